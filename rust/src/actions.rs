use crate::model::{LocalId, SearchOptions};

#[derive(Debug, Clone)]
pub enum AppAction {
    // Conversation list
    LoadConversations,
    LoadMoreConversations,
    AddConversation {
        service: String,
        members: Vec<String>,
        name: Option<String>,
    },
    MarkConversationRead {
        local_id: LocalId,
    },
    /// Accepts a chat guid or a decimal local id.
    OpenConversation {
        conversation_id: String,
    },
    CloseConversation,

    // Compose
    SendMessage {
        local_id: LocalId,
        text: String,
    },

    // Attachment drawer
    LoadConversationMedia {
        chat_guid: String,
    },
    CloseMedia,

    // Search
    Search {
        options: SearchOptions,
    },
    ClearSearch,
    ScanConversations {
        query: String,
    },

    // Lifecycle
    SetInteractive {
        interactive: bool,
    },
    /// Authenticated session changed; session-scoped caches are rebuilt.
    SessionChanged {
        scope_key: String,
    },
}

impl AppAction {
    /// Log-safe action tag (never includes message text or search queries).
    pub fn tag(&self) -> &'static str {
        match self {
            // Conversation list
            AppAction::LoadConversations => "LoadConversations",
            AppAction::LoadMoreConversations => "LoadMoreConversations",
            AppAction::AddConversation { .. } => "AddConversation",
            AppAction::MarkConversationRead { .. } => "MarkConversationRead",
            AppAction::OpenConversation { .. } => "OpenConversation",
            AppAction::CloseConversation => "CloseConversation",

            // Compose
            AppAction::SendMessage { .. } => "SendMessage",

            // Attachment drawer
            AppAction::LoadConversationMedia { .. } => "LoadConversationMedia",
            AppAction::CloseMedia => "CloseMedia",

            // Search
            AppAction::Search { .. } => "Search",
            AppAction::ClearSearch => "ClearSearch",
            AppAction::ScanConversations { .. } => "ScanConversations",

            // Lifecycle
            AppAction::SetInteractive { .. } => "SetInteractive",
            AppAction::SessionChanged { .. } => "SessionChanged",
        }
    }
}
