//! Classifies conversation identities and finds them in an ordered list.

use std::fmt;
use std::sync::{Arc, OnceLock};

use regex::Regex;

use crate::model::{Conversation, LocalId};

/// Either a server chat guid or a process-local id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationId {
    Local(LocalId),
    Remote(String),
}

fn remote_guid_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // e.g. `iMessage;-;+15551234567`, `SMS;+;chat123456`
    RE.get_or_init(|| Regex::new(r"^[A-Za-z]+;[-+];\S+$").expect("static regex"))
}

impl ConversationId {
    /// Classifies a raw identity by shape. Returns `None` when it is neither a
    /// chat guid nor a local integer id.
    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        if remote_guid_regex().is_match(raw) {
            return Some(ConversationId::Remote(raw.to_string()));
        }
        if raw.bytes().all(|b| b.is_ascii_digit()) {
            return raw.parse::<u64>().ok().map(|n| ConversationId::Local(LocalId(n)));
        }
        None
    }

    pub fn is_remote(&self) -> bool {
        matches!(self, ConversationId::Remote(_))
    }

    /// Remote ids only match linked conversations; local ids match any
    /// conversation, since a relinked conversation keeps its `LocalId`.
    pub fn matches(&self, conversation: &Conversation) -> bool {
        match self {
            ConversationId::Local(id) => conversation.local_id == *id,
            ConversationId::Remote(guid) => conversation.guid.as_deref() == Some(guid.as_str()),
        }
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationId::Local(id) => write!(f, "local:{id}"),
            ConversationId::Remote(guid) => write!(f, "{guid}"),
        }
    }
}

pub fn resolve_index(list: &[Arc<Conversation>], id: &ConversationId) -> Option<usize> {
    list.iter().position(|c| id.matches(c))
}

pub fn resolve_raw_index(list: &[Arc<Conversation>], raw: &str) -> Option<usize> {
    let id = ConversationId::parse(raw)?;
    resolve_index(list, &id)
}
