use crate::error::FetchError;
use crate::model::{
    Attachment, ConversationItem, LocalId, MessageModifier, RemoteConversation, ScanTotals,
    SearchHit, SearchOptions,
};
use crate::notify::MessageNotification;
use crate::server::InfoResults;
use crate::state::AppState;
use crate::AppAction;

#[derive(Clone, Debug)]
pub enum AppUpdate {
    /// Every change ships a full snapshot; the conversation list inside it is
    /// shared, not copied.
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Notification candidates classified while a message batch was applied,
/// waiting on the focus query.
#[derive(Debug, Clone)]
pub struct PendingDispatch {
    pub candidates: Vec<MessageNotification>,
    /// Conversation open when the batch was classified.
    pub active: Option<LocalId>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanOutcome {
    pub totals: ScanTotals,
    pub scanned: usize,
    pub matches: Vec<RemoteConversation>,
}

#[derive(Debug)]
pub enum InternalEvent {
    // Inbound stream (also used to replay buffered items after linkage)
    MessagesReceived {
        items: Vec<ConversationItem>,
    },
    ModifiersReceived {
        modifiers: Vec<MessageModifier>,
    },

    // Pending linkage
    ConversationInfoFetched {
        session: u64,
        results: InfoResults,
    },

    // Notification dispatch
    FocusResolved {
        dispatch: PendingDispatch,
        focused: bool,
    },

    // Listing
    ConversationsLoaded {
        token: u64,
        requested: usize,
        result: Result<Vec<RemoteConversation>, FetchError>,
    },
    ScanCompleted {
        token: u64,
        result: Result<ScanOutcome, FetchError>,
    },

    // Session caches
    MediaStaleFlush {
        session: u64,
    },
    MediaFetched {
        token: u64,
        session: u64,
        chat_guid: String,
        result: Result<Vec<Attachment>, FetchError>,
    },
    SearchFetched {
        token: u64,
        session: u64,
        options: SearchOptions,
        result: Result<Vec<SearchHit>, FetchError>,
    },
}

impl InternalEvent {
    pub fn tag(&self) -> &'static str {
        match self {
            InternalEvent::MessagesReceived { .. } => "MessagesReceived",
            InternalEvent::ModifiersReceived { .. } => "ModifiersReceived",
            InternalEvent::ConversationInfoFetched { .. } => "ConversationInfoFetched",
            InternalEvent::FocusResolved { .. } => "FocusResolved",
            InternalEvent::ConversationsLoaded { .. } => "ConversationsLoaded",
            InternalEvent::ScanCompleted { .. } => "ScanCompleted",
            InternalEvent::MediaStaleFlush { .. } => "MediaStaleFlush",
            InternalEvent::MediaFetched { .. } => "MediaFetched",
            InternalEvent::SearchFetched { .. } => "SearchFetched",
        }
    }
}
