use std::collections::{HashMap, VecDeque};
use std::hash::Hash;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
struct Entry<V> {
    value: V,
    inserted_at: Instant,
    stale: bool,
}

/// Result of a cache read. `stale` covers both explicit invalidation and TTL
/// expiry; the value is still handed out so callers can show it as a fallback.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheLookup<'a, V> {
    pub value: &'a V,
    pub stale: bool,
}

/// Insertion-ordered map with a fixed capacity and a per-entry TTL.
#[derive(Debug, Clone)]
pub struct BoundedCache<K, V> {
    capacity: usize,
    ttl: Duration,
    entries: HashMap<K, Entry<V>>,
    order: VecDeque<K>,
}

impl<K: Eq + Hash + Clone, V> BoundedCache<K, V> {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            ttl,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<CacheLookup<'_, V>> {
        self.get_at(key, Instant::now())
    }

    pub fn get_at(&self, key: &K, now: Instant) -> Option<CacheLookup<'_, V>> {
        let entry = self.entries.get(key)?;
        let expired = now.saturating_duration_since(entry.inserted_at) >= self.ttl;
        Some(CacheLookup {
            value: &entry.value,
            stale: entry.stale || expired,
        })
    }

    /// Re-inserting a key moves it to the back of the eviction queue and
    /// clears its stale flag.
    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Instant::now());
    }

    pub fn insert_at(&mut self, key: K, value: V, now: Instant) {
        if self.entries.contains_key(&key) {
            self.order.retain(|k| k != &key);
        }
        self.entries.insert(
            key.clone(),
            Entry {
                value,
                inserted_at: now,
                stale: false,
            },
        );
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.entries.remove(&evicted);
            }
        }
    }

    pub fn mark_stale(&mut self, key: &K) -> bool {
        match self.entries.get_mut(key) {
            Some(entry) => {
                entry.stale = true;
                true
            }
            None => false,
        }
    }

    /// Marks every entry matching `pred`; returns how many were marked.
    pub fn mark_stale_where(&mut self, mut pred: impl FnMut(&K, &V) -> bool) -> usize {
        let mut marked = 0;
        for (key, entry) in self.entries.iter_mut() {
            if pred(key, &entry.value) {
                entry.stale = true;
                marked += 1;
            }
        }
        marked
    }

    pub fn mark_all_stale(&mut self) -> usize {
        self.mark_stale_where(|_, _| true)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.order.retain(|k| k != key);
        Some(entry.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
