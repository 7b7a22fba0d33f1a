use std::sync::Arc;

use crate::model::{
    Attachment, Conversation, ConversationItem, LocalId, RemoteConversation, ScanTotals,
    SearchHit, SearchOptions,
};

/// Immutable ordered view of the conversation list. Cloning is a refcount bump.
pub type ConversationListSnapshot = Arc<Vec<Arc<Conversation>>>;

#[derive(Debug, Clone)]
pub struct AppState {
    pub rev: u64,
    pub conversations: ConversationListSnapshot,
    /// How many conversations the list UI should render.
    pub visible_limit: usize,
    pub has_more_conversations: bool,
    pub loading_conversations: bool,
    pub conversations_error: Option<String>,
    pub active_conversation: Option<LocalId>,
    pub interactive: bool,
    pub timeline: Option<TimelineView>,
    pub media: Option<MediaView>,
    pub search: Option<SearchView>,
    pub scan: Option<ScanView>,
}

impl AppState {
    pub fn empty() -> Self {
        Self {
            rev: 0,
            conversations: Arc::new(Vec::new()),
            visible_limit: 0,
            has_more_conversations: false,
            loading_conversations: false,
            conversations_error: None,
            active_conversation: None,
            interactive: true,
            timeline: None,
            media: None,
            search: None,
            scan: None,
        }
    }

    pub fn visible_conversations(&self) -> &[Arc<Conversation>] {
        let end = self.visible_limit.min(self.conversations.len());
        &self.conversations[..end]
    }

    pub fn conversation(&self, local_id: LocalId) -> Option<&Arc<Conversation>> {
        self.conversations.iter().find(|c| c.local_id == local_id)
    }

    pub fn conversation_by_guid(&self, guid: &str) -> Option<&Arc<Conversation>> {
        self.conversations
            .iter()
            .find(|c| c.guid.as_deref() == Some(guid))
    }
}

/// Items of the open conversation, oldest first.
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineView {
    pub local_id: LocalId,
    pub items: Vec<ConversationItem>,
}

/// Attachment drawer for one chat.
#[derive(Debug, Clone, PartialEq)]
pub struct MediaView {
    pub chat_guid: String,
    pub attachments: Vec<Attachment>,
    pub loading: bool,
    pub error: Option<String>,
    /// Attachments came from the session cache rather than a fresh fetch.
    pub from_cache: bool,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchView {
    pub options: SearchOptions,
    pub hits: Vec<SearchHit>,
    pub loading: bool,
    pub error: Option<String>,
    pub from_cache: bool,
    pub stale: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanView {
    pub query: String,
    pub totals: Option<ScanTotals>,
    pub scanned: usize,
    pub matches: Vec<RemoteConversation>,
    pub loading: bool,
    pub error: Option<String>,
}

pub(crate) fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Local wall-clock time for a millisecond timestamp, e.g. `3:07 PM`.
pub fn format_display_timestamp(millis: i64) -> String {
    use chrono::TimeZone;
    let display = chrono::Utc
        .timestamp_millis_opt(millis)
        .single()
        .map(|utc| utc.with_timezone(&chrono::Local))
        .unwrap_or_else(chrono::Local::now)
        .format("%l:%M %p")
        .to_string();
    display.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ConversationPreview;

    #[test]
    fn visible_conversations_respects_limit() {
        let mut state = AppState::empty();
        let list: Vec<Arc<Conversation>> = (1..=3)
            .map(|i| {
                Arc::new(Conversation {
                    local_id: LocalId(i),
                    guid: None,
                    service: "iMessage".into(),
                    members: vec![],
                    name: None,
                    preview: ConversationPreview::Empty,
                    unread_messages: false,
                })
            })
            .collect();
        state.conversations = Arc::new(list);
        state.visible_limit = 2;
        assert_eq!(state.visible_conversations().len(), 2);
        state.visible_limit = 10;
        assert_eq!(state.visible_conversations().len(), 3);
        assert!(state.conversation(LocalId(3)).is_some());
    }
}
