use std::collections::BTreeSet;
use std::time::Duration;

use super::bounded::{BoundedCache, CacheLookup};
use super::CacheSettings;
use crate::model::{Attachment, ConversationItem};

/// Per-chat attachment listings for the attachment drawer, scoped to one
/// authenticated session.
#[derive(Debug)]
pub struct MediaCache {
    scope_key: String,
    entries: BoundedCache<String, Vec<Attachment>>,
    pending_stale: BTreeSet<String>,
    flush_armed: bool,
    debounce: Duration,
}

impl MediaCache {
    pub fn create(scope_key: impl Into<String>, settings: CacheSettings, debounce: Duration) -> Self {
        let scope_key = scope_key.into();
        tracing::debug!(scope = %scope_key, "media cache created");
        Self {
            scope_key,
            entries: BoundedCache::new(settings.capacity, settings.ttl),
            pending_stale: BTreeSet::new(),
            flush_armed: false,
            debounce,
        }
    }

    pub fn dispose(mut self) {
        tracing::debug!(scope = %self.scope_key, entries = self.entries.len(), "media cache disposed");
        self.entries.clear();
        self.pending_stale.clear();
    }

    pub fn scope_key(&self) -> &str {
        &self.scope_key
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    pub fn get(&self, chat_guid: &str) -> Option<CacheLookup<'_, Vec<Attachment>>> {
        self.entries.get(&chat_guid.to_string())
    }

    pub fn store(&mut self, chat_guid: &str, attachments: Vec<Attachment>) {
        self.entries.insert(chat_guid.to_string(), attachments);
    }

    /// Queues a staleness notification for every known chat that received an
    /// image. Returns true when the caller has to arm the (single) flush timer.
    pub fn note_messages(
        &mut self,
        items: &[ConversationItem],
        is_known: impl Fn(&str) -> bool,
    ) -> bool {
        for item in items {
            let Some(message) = item.as_message() else {
                continue;
            };
            let Some(chat_guid) = message.header.chat_guid.as_ref() else {
                continue;
            };
            if message.has_image_attachment() && is_known(chat_guid) {
                self.pending_stale.insert(chat_guid.clone());
            }
        }
        if self.pending_stale.is_empty() || self.flush_armed {
            return false;
        }
        self.flush_armed = true;
        true
    }

    /// Marks every pending chat stale and returns them, once each.
    pub fn flush_pending(&mut self) -> Vec<String> {
        self.flush_armed = false;
        let pending = std::mem::take(&mut self.pending_stale);
        for guid in &pending {
            self.entries.mark_stale(guid);
        }
        pending.into_iter().collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.pending_stale.is_empty()
    }
}
