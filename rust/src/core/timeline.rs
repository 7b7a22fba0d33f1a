use std::collections::HashMap;

use crate::model::{ConversationItem, LocalId, MessageItem};

/// Per-conversation item timelines for linked conversations, sorted by date.
#[derive(Debug, Default)]
pub(crate) struct Timelines {
    by_conversation: HashMap<LocalId, Vec<ConversationItem>>,
    /// Message guid -> owning conversation, for modifier lookups.
    message_owner: HashMap<String, LocalId>,
}

impl Timelines {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces an existing item with the same guid or local id, otherwise
    /// inserts it in date order. Returns true when the timeline changed.
    pub fn upsert(&mut self, local_id: LocalId, item: ConversationItem) -> bool {
        let items = self.by_conversation.entry(local_id).or_default();
        if let Some(guid) = item.header().guid.clone() {
            if item.as_message().is_some() {
                self.message_owner.insert(guid, local_id);
            }
        }
        if let Some(existing) = items
            .iter_mut()
            .find(|existing| existing.header().same_item(item.header()))
        {
            if *existing == item {
                return false;
            }
            *existing = item;
            items.sort_by_key(ConversationItem::date);
            return true;
        }
        // After every item with the same or an earlier date.
        let at = items.partition_point(|existing| existing.date() <= item.date());
        items.insert(at, item);
        true
    }

    pub fn get(&self, local_id: LocalId) -> &[ConversationItem] {
        self.by_conversation
            .get(&local_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn owner_of(&self, message_guid: &str) -> Option<LocalId> {
        self.message_owner.get(message_guid).copied()
    }

    pub fn message_mut(&mut self, message_guid: &str) -> Option<(LocalId, &mut MessageItem)> {
        let local_id = self.owner_of(message_guid)?;
        let items = self.by_conversation.get_mut(&local_id)?;
        items
            .iter_mut()
            .filter_map(ConversationItem::as_message_mut)
            .find(|m| m.header.guid.as_deref() == Some(message_guid))
            .map(|m| (local_id, m))
    }
}
