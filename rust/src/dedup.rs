use std::collections::{HashSet, VecDeque};

use crate::model::{TapbackItem, TapbackType};

pub const DEFAULT_DEDUP_CAPACITY: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TapbackKey {
    pub message_guid: String,
    pub tapback_type: TapbackType,
    pub sender: Option<String>,
    pub message_index: u32,
    pub is_addition: bool,
}

impl From<&TapbackItem> for TapbackKey {
    fn from(t: &TapbackItem) -> Self {
        Self {
            message_guid: t.message_guid.clone(),
            tapback_type: t.tapback_type,
            sender: t.sender.clone(),
            message_index: t.message_index,
            is_addition: t.is_addition,
        }
    }
}

/// Bounded FIFO of recently applied tapback keys.
///
/// Redelivery after a key has been evicted is not detected.
#[derive(Debug, Clone)]
pub struct ModifierDedupWindow {
    capacity: usize,
    seen: HashSet<TapbackKey>,
    order: VecDeque<TapbackKey>,
}

impl Default for ModifierDedupWindow {
    fn default() -> Self {
        Self::new(DEFAULT_DEDUP_CAPACITY)
    }
}

impl ModifierDedupWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            seen: HashSet::new(),
            order: VecDeque::new(),
        }
    }

    /// Records the tapback and reports whether it is new.
    pub fn should_apply(&mut self, tapback: &TapbackItem) -> bool {
        let key = TapbackKey::from(tapback);
        if self.seen.contains(&key) {
            return false;
        }
        self.seen.insert(key.clone());
        self.order.push_back(key);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.seen.remove(&evicted);
            }
        }
        true
    }

    pub fn contains(&self, key: &TapbackKey) -> bool {
        self.seen.contains(key)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }
}
