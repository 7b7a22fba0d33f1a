//! Messages of conversations that have never synced with the server.

use std::collections::HashMap;

use crate::model::{ConversationItem, LocalId};

#[derive(Debug, Default)]
pub struct LocalMessageCache {
    by_conversation: HashMap<LocalId, Vec<ConversationItem>>,
}

impl LocalMessageCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces (by guid/localID) and keeps items sorted by date.
    pub fn upsert(&mut self, conversation: LocalId, item: ConversationItem) {
        let items = self.by_conversation.entry(conversation).or_default();
        if let Some(existing) = items
            .iter_mut()
            .find(|i| i.header().same_item(item.header()))
        {
            *existing = item;
        } else {
            items.push(item);
        }
        items.sort_by_key(ConversationItem::date);
    }

    pub fn get(&self, conversation: LocalId) -> &[ConversationItem] {
        self.by_conversation
            .get(&conversation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn contains(&self, conversation: LocalId) -> bool {
        self.by_conversation.contains_key(&conversation)
    }

    pub fn invalidate(&mut self, conversation: LocalId) -> Option<Vec<ConversationItem>> {
        self.by_conversation.remove(&conversation)
    }

    pub fn clear(&mut self) {
        self.by_conversation.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ItemHeader, MessageItem};

    fn local_message(local_id: u64, date: i64, text: &str) -> ConversationItem {
        ConversationItem::Message(MessageItem {
            header: ItemHeader {
                date,
                local_id: Some(local_id),
                chat_local_id: Some(LocalId(1)),
                ..Default::default()
            },
            text: Some(text.into()),
            ..Default::default()
        })
    }

    #[test]
    fn upsert_replaces_by_local_id_and_sorts() {
        let mut cache = LocalMessageCache::new();
        cache.upsert(LocalId(1), local_message(2, 20, "second"));
        cache.upsert(LocalId(1), local_message(1, 10, "first"));
        cache.upsert(LocalId(1), local_message(2, 20, "second (edited)"));

        let items = cache.get(LocalId(1));
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].date(), 10);
        assert_eq!(
            items[1].as_message().and_then(|m| m.text.as_deref()),
            Some("second (edited)")
        );
    }

    #[test]
    fn invalidate_drops_entry() {
        let mut cache = LocalMessageCache::new();
        cache.upsert(LocalId(1), local_message(1, 10, "hi"));
        assert!(cache.invalidate(LocalId(1)).is_some());
        assert!(!cache.contains(LocalId(1)));
        assert!(cache.get(LocalId(1)).is_empty());
    }
}
