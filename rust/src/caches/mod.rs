//! Caches that depend on the inbound event stream but are not owned by the
//! reconciliation engine. Each instance lives for one authenticated session.

mod bounded;
mod media;
mod search;

use std::time::Duration;

pub use bounded::{BoundedCache, CacheLookup};
pub use media::MediaCache;
pub use search::{SearchCache, SearchEntry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub capacity: usize,
    pub ttl: Duration,
}
