use std::collections::BTreeSet;

use super::bounded::{BoundedCache, CacheLookup};
use super::CacheSettings;
use crate::model::{ConversationItem, SearchHit, SearchOptions};

#[derive(Debug, Clone)]
pub struct SearchEntry {
    pub options: SearchOptions,
    pub hits: Vec<SearchHit>,
    /// `None` when the search was not restricted to particular chats.
    scope: Option<BTreeSet<String>>,
}

impl SearchEntry {
    fn affected_by(&self, chats: &BTreeSet<String>) -> bool {
        match &self.scope {
            None => true,
            Some(scope) => !scope.is_disjoint(chats),
        }
    }
}

/// Search results keyed by normalized options, scoped to one session.
#[derive(Debug)]
pub struct SearchCache {
    scope_key: String,
    entries: BoundedCache<String, SearchEntry>,
}

impl SearchCache {
    pub fn create(scope_key: impl Into<String>, settings: CacheSettings) -> Self {
        let scope_key = scope_key.into();
        tracing::debug!(scope = %scope_key, "search cache created");
        Self {
            scope_key,
            entries: BoundedCache::new(settings.capacity, settings.ttl),
        }
    }

    pub fn dispose(mut self) {
        tracing::debug!(scope = %self.scope_key, entries = self.entries.len(), "search cache disposed");
        self.entries.clear();
    }

    pub fn scope_key(&self) -> &str {
        &self.scope_key
    }

    pub fn get(&self, options: &SearchOptions) -> Option<CacheLookup<'_, SearchEntry>> {
        self.entries.get(&options.normalized_key())
    }

    pub fn store(&mut self, options: SearchOptions, hits: Vec<SearchHit>) {
        let key = options.normalized_key();
        let scope = options.scope();
        self.entries.insert(
            key,
            SearchEntry {
                options,
                hits,
                scope,
            },
        );
    }

    /// Marks entries whose scope could contain any of the new messages.
    /// Batches with no known chat guid mark everything.
    pub fn note_messages(&mut self, items: &[ConversationItem]) -> usize {
        let mut affected: BTreeSet<String> = BTreeSet::new();
        let mut undetermined = false;
        let mut saw_message = false;
        for item in items {
            if item.as_message().is_none() {
                continue;
            }
            saw_message = true;
            match item.header().chat_guid.as_ref() {
                Some(guid) => {
                    affected.insert(guid.clone());
                }
                None => undetermined = true,
            }
        }
        if !saw_message {
            return 0;
        }
        if undetermined {
            return self.entries.mark_all_stale();
        }
        self.entries
            .mark_stale_where(|_, entry| entry.affected_by(&affected))
    }

    /// Tapback changes carry no chat guid, so every entry goes stale.
    pub fn note_modifiers(&mut self) -> usize {
        self.entries.mark_all_stale()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemHeader, MessageItem};
    use std::time::Duration;

    fn cache() -> SearchCache {
        SearchCache::create(
            "scope",
            CacheSettings {
                capacity: 8,
                ttl: Duration::from_secs(60),
            },
        )
    }

    fn opts(query: &str, chats: Option<&[&str]>) -> SearchOptions {
        SearchOptions {
            query: query.into(),
            chat_guids: chats.map(|c| c.iter().map(|s| s.to_string()).collect()),
            limit: None,
        }
    }

    fn message_in(chat: Option<&str>) -> ConversationItem {
        ConversationItem::Message(MessageItem {
            header: ItemHeader {
                date: 1,
                chat_guid: chat.map(str::to_string),
                ..Default::default()
            },
            ..Default::default()
        })
    }

    #[test]
    fn scoped_entries_only_go_stale_when_intersecting() {
        let mut c = cache();
        c.store(opts("a", Some(&["chat-1"][..])), vec![]);
        c.store(opts("b", Some(&["chat-2"][..])), vec![]);
        c.store(opts("c", None), vec![]);

        let marked = c.note_messages(&[message_in(Some("chat-1"))]);
        assert_eq!(marked, 2);
        assert!(c.get(&opts("a", Some(&["chat-1"][..]))).unwrap().stale);
        assert!(!c.get(&opts("b", Some(&["chat-2"][..]))).unwrap().stale);
        assert!(c.get(&opts("c", None)).unwrap().stale);
    }

    #[test]
    fn unknown_chat_marks_everything() {
        let mut c = cache();
        c.store(opts("a", Some(&["chat-1"][..])), vec![]);
        c.store(opts("b", Some(&["chat-2"][..])), vec![]);
        assert_eq!(c.note_messages(&[message_in(None)]), 2);
    }

    #[test]
    fn modifiers_mark_everything() {
        let mut c = cache();
        c.store(opts("a", Some(&["chat-1"][..])), vec![]);
        assert_eq!(c.note_modifiers(), 1);
        assert!(c.get(&opts("a", Some(&["chat-1"][..]))).unwrap().stale);
    }
}
