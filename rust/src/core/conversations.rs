//! Arena-backed, order-preserving conversation list.
//!
//! Conversations live in stable slots as `Arc`s. A mutation replaces the slot's
//! `Arc` (never the value behind it) and bumps the generation, so snapshots
//! handed to readers stay untouched.

use std::collections::HashMap;
use std::sync::Arc;

use crate::identity::ConversationId;
use crate::model::{Conversation, ConversationPreview, LocalId, RemoteConversation};
use crate::state::ConversationListSnapshot;

#[derive(Debug)]
pub(crate) struct ConversationList {
    slots: Vec<Arc<Conversation>>,
    slot_by_local: HashMap<LocalId, usize>,
    slot_by_guid: HashMap<String, usize>,
    /// Slot indices, most recent preview first.
    order: Vec<usize>,
    generation: u64,
    next_local_id: u64,
    snapshot: ConversationListSnapshot,
    snapshot_generation: u64,
}

impl Default for ConversationList {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationList {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            slot_by_local: HashMap::new(),
            slot_by_guid: HashMap::new(),
            order: Vec::new(),
            generation: 0,
            next_local_id: 1,
            snapshot: Arc::new(Vec::new()),
            snapshot_generation: 0,
        }
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// Ordered snapshot; rebuilt only when the generation moved.
    pub fn snapshot(&mut self) -> ConversationListSnapshot {
        if self.snapshot_generation != self.generation {
            let list: Vec<Arc<Conversation>> =
                self.order.iter().map(|&slot| self.slots[slot].clone()).collect();
            self.snapshot = Arc::new(list);
            self.snapshot_generation = self.generation;
        }
        self.snapshot.clone()
    }

    pub fn get(&self, local_id: LocalId) -> Option<&Arc<Conversation>> {
        self.slot_by_local.get(&local_id).map(|&slot| &self.slots[slot])
    }

    pub fn get_by_guid(&self, guid: &str) -> Option<&Arc<Conversation>> {
        self.slot_by_guid.get(guid).map(|&slot| &self.slots[slot])
    }

    pub fn resolve(&self, id: &ConversationId) -> Option<LocalId> {
        match id {
            ConversationId::Local(local) => self.get(*local).map(|c| c.local_id),
            ConversationId::Remote(guid) => self.get_by_guid(guid).map(|c| c.local_id),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Conversation>> + '_ {
        self.order.iter().map(move |&slot| &self.slots[slot])
    }

    /// First local-only conversation that is the same chat as a server one.
    pub fn find_local_only_match(&self, service: &str, members: &[String]) -> Option<LocalId> {
        self.iter()
            .find(|c| !c.is_linked() && c.same_participants(service, members))
            .map(|c| c.local_id)
    }

    pub fn insert_local(
        &mut self,
        service: String,
        members: Vec<String>,
        name: Option<String>,
    ) -> LocalId {
        let local_id = self.allocate_local_id();
        self.push(Conversation {
            local_id,
            guid: None,
            service,
            members,
            name,
            preview: ConversationPreview::Empty,
            unread_messages: false,
        });
        local_id
    }

    /// Inserts a server conversation. A guid that is already linked is never
    /// inserted twice; the existing conversation's id is returned instead.
    pub fn insert_remote(&mut self, remote: RemoteConversation) -> LocalId {
        if let Some(existing) = self.get_by_guid(&remote.guid) {
            tracing::debug!(guid = %remote.guid, "conversation already linked");
            return existing.local_id;
        }
        let local_id = self.allocate_local_id();
        self.push(Conversation {
            local_id,
            guid: Some(remote.guid),
            service: remote.service,
            members: remote.members,
            name: remote.name,
            preview: remote.preview,
            unread_messages: remote.unread_messages,
        });
        local_id
    }

    /// Links a local-only conversation to its server counterpart in place.
    /// The `LocalId` and list position are kept.
    pub fn relink(&mut self, local_id: LocalId, remote: &RemoteConversation) -> bool {
        let Some(&slot) = self.slot_by_local.get(&local_id) else {
            return false;
        };
        if self.slots[slot].is_linked() || self.slot_by_guid.contains_key(&remote.guid) {
            return false;
        }
        let mut next = (*self.slots[slot]).clone();
        next.guid = Some(remote.guid.clone());
        next.members = remote.members.clone();
        if remote.name.is_some() {
            next.name = remote.name.clone();
        }
        self.slots[slot] = Arc::new(next);
        self.slot_by_guid.insert(remote.guid.clone(), slot);
        self.generation += 1;
        true
    }

    /// Copy-on-write update. Returns false (and leaves the generation alone)
    /// when the result is structurally equal to the current value.
    pub fn update(&mut self, local_id: LocalId, f: impl FnOnce(&mut Conversation)) -> bool {
        let Some(&slot) = self.slot_by_local.get(&local_id) else {
            return false;
        };
        let current = &self.slots[slot];
        let mut next = (**current).clone();
        f(&mut next);
        // Identity is owned by the list.
        next.local_id = current.local_id;
        next.guid = current.guid.clone();
        if next == **current {
            return false;
        }
        self.slots[slot] = Arc::new(next);
        self.generation += 1;
        true
    }

    /// Moves a conversation to keep the list in descending preview-date
    /// order. Only this entry moves; the rest keep their relative order.
    pub fn reposition(&mut self, local_id: LocalId) -> bool {
        let Some(&slot) = self.slot_by_local.get(&local_id) else {
            return false;
        };
        let Some(current) = self.order.iter().position(|&s| s == slot) else {
            return false;
        };
        self.order.remove(current);
        let target = self.insert_position(slot);
        self.order.insert(target, slot);
        if target == current {
            return false;
        }
        self.generation += 1;
        true
    }

    fn allocate_local_id(&mut self) -> LocalId {
        let id = LocalId(self.next_local_id);
        self.next_local_id += 1;
        id
    }

    fn push(&mut self, conversation: Conversation) {
        let slot = self.slots.len();
        self.slot_by_local.insert(conversation.local_id, slot);
        if let Some(guid) = conversation.guid.clone() {
            self.slot_by_guid.insert(guid, slot);
        }
        self.slots.push(Arc::new(conversation));
        let target = self.insert_position(slot);
        self.order.insert(target, slot);
        self.generation += 1;
    }

    /// Before the first entry that is not newer. Conversations without a
    /// preview sort last.
    fn insert_position(&self, slot: usize) -> usize {
        let date = self.slots[slot].preview_date();
        self.order
            .iter()
            .position(|&other| self.slots[other].preview_date() <= date)
            .unwrap_or(self.order.len())
    }
}
