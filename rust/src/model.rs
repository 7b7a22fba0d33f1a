use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::ConversationId;

/// Process-local conversation id. Assigned once and kept for the whole session,
/// including after the conversation is linked to a server guid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub local_id: LocalId,
    /// `None` while the conversation is local-only.
    pub guid: Option<String>,
    pub service: String,
    pub members: Vec<String>,
    pub name: Option<String>,
    pub preview: ConversationPreview,
    pub unread_messages: bool,
}

impl Conversation {
    pub fn is_linked(&self) -> bool {
        self.guid.is_some()
    }

    pub fn preview_date(&self) -> Option<i64> {
        self.preview.date()
    }

    /// Order-insensitive, address-normalized member comparison used when a
    /// server conversation may be the counterpart of a local-only one.
    pub fn same_participants(&self, service: &str, members: &[String]) -> bool {
        self.service.eq_ignore_ascii_case(service)
            && normalized_member_set(&self.members) == normalized_member_set(members)
    }

    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) if !name.trim().is_empty() => name.clone(),
            _ if self.members.is_empty() => "New conversation".to_string(),
            _ => self.members.join(", "),
        }
    }
}

/// Server-side conversation shape, before it has been given a [`LocalId`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteConversation {
    pub guid: String,
    pub service: String,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub preview: ConversationPreview,
    #[serde(default)]
    pub unread_messages: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ConversationPreview {
    #[default]
    Empty,
    Message(MessagePreview),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePreview {
    pub date: i64,
    pub text: Option<String>,
    #[serde(default)]
    pub send_style: Option<String>,
    /// One summary entry per attachment (its mime type, or name when unknown).
    #[serde(default)]
    pub attachments: Vec<String>,
}

impl ConversationPreview {
    pub fn date(&self) -> Option<i64> {
        match self {
            ConversationPreview::Empty => None,
            ConversationPreview::Message(p) => Some(p.date),
        }
    }

    pub fn from_message(message: &MessageItem) -> Self {
        ConversationPreview::Message(MessagePreview {
            date: message.header.date,
            text: message.text.clone(),
            send_style: message.send_style.clone(),
            attachments: message
                .attachments
                .iter()
                .map(|a| {
                    a.mime_type
                        .clone()
                        .or_else(|| a.name.clone())
                        .unwrap_or_else(|| "attachment".to_string())
                })
                .collect(),
        })
    }

    pub fn snippet(&self) -> String {
        match self {
            ConversationPreview::Empty => "No messages yet".to_string(),
            ConversationPreview::Message(p) => match &p.text {
                Some(text) if !text.trim().is_empty() => text.clone(),
                _ if !p.attachments.is_empty() => {
                    format!("{} attachment(s)", p.attachments.len())
                }
                _ => String::new(),
            },
        }
    }
}

/// Fields shared by every [`ConversationItem`] variant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemHeader {
    pub date: i64,
    #[serde(default)]
    pub guid: Option<String>,
    #[serde(default, rename = "localID")]
    pub local_id: Option<u64>,
    #[serde(default)]
    pub chat_guid: Option<String>,
    #[serde(default, rename = "chatLocalID")]
    pub chat_local_id: Option<LocalId>,
}

impl ItemHeader {
    /// A local back-reference wins: locally originated items keep pointing at
    /// the conversation's `LocalId`, which survives relinking.
    pub fn conversation_id(&self) -> Option<ConversationId> {
        if let Some(local) = self.chat_local_id {
            return Some(ConversationId::Local(local));
        }
        self.chat_guid
            .as_ref()
            .map(|guid| ConversationId::Remote(guid.clone()))
    }

    /// True when both headers describe the same logical item.
    pub fn same_item(&self, other: &ItemHeader) -> bool {
        match (&self.guid, &other.guid) {
            (Some(a), Some(b)) if a == b => return true,
            _ => {}
        }
        matches!((self.local_id, other.local_id), (Some(a), Some(b)) if a == b)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "itemType")]
pub enum ConversationItem {
    Message(MessageItem),
    ParticipantAction(ParticipantAction),
    ChatRenameAction(ChatRenameAction),
}

impl ConversationItem {
    pub fn header(&self) -> &ItemHeader {
        match self {
            ConversationItem::Message(m) => &m.header,
            ConversationItem::ParticipantAction(a) => &a.header,
            ConversationItem::ChatRenameAction(a) => &a.header,
        }
    }

    pub fn date(&self) -> i64 {
        self.header().date
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.header().conversation_id()
    }

    pub fn as_message(&self) -> Option<&MessageItem> {
        match self {
            ConversationItem::Message(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_message_mut(&mut self) -> Option<&mut MessageItem> {
        match self {
            ConversationItem::Message(m) => Some(m),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageStatus {
    #[default]
    Unconfirmed,
    Sent,
    Delivered,
    Read,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageItem {
    #[serde(flatten)]
    pub header: ItemHeader,
    #[serde(default)]
    pub text: Option<String>,
    /// `None` means the local user sent it.
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(default)]
    pub status_date: Option<i64>,
    #[serde(default)]
    pub send_style: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub stickers: Vec<Sticker>,
    #[serde(default)]
    pub tapbacks: Vec<Tapback>,
    #[serde(default)]
    pub error: Option<MessageError>,
    /// -1 is indeterminate, 0..=100 is determinate upload progress.
    #[serde(default)]
    pub progress: Option<i32>,
}

impl MessageItem {
    pub fn is_incoming(&self) -> bool {
        self.sender.is_some()
    }

    pub fn has_image_attachment(&self) -> bool {
        self.attachments.iter().any(Attachment::is_image)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub guid: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub size: Option<u64>,
}

impl Attachment {
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .map(|m| m.starts_with("image/"))
            .unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sticker {
    pub guid: String,
    pub message_index: u32,
    #[serde(default)]
    pub sender: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tapback {
    #[serde(default)]
    pub sender: Option<String>,
    pub tapback_type: TapbackType,
    pub message_index: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TapbackType {
    Love,
    Like,
    Dislike,
    Laugh,
    Emphasis,
    Question,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageError {
    pub code: i32,
    #[serde(default)]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ParticipantActionType {
    Join,
    Leave,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantAction {
    #[serde(flatten)]
    pub header: ItemHeader,
    #[serde(rename = "type")]
    pub kind: ParticipantActionType,
    #[serde(default)]
    pub sender: Option<String>,
    /// `None` refers to the local user.
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRenameAction {
    #[serde(flatten)]
    pub header: ItemHeader,
    #[serde(default)]
    pub sender: Option<String>,
    pub chat_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum MessageModifier {
    Tapback(TapbackItem),
    Sticker(StickerItem),
}

impl MessageModifier {
    pub fn message_guid(&self) -> &str {
        match self {
            MessageModifier::Tapback(t) => &t.message_guid,
            MessageModifier::Sticker(s) => &s.message_guid,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TapbackItem {
    pub message_guid: String,
    pub message_index: u32,
    #[serde(default)]
    pub sender: Option<String>,
    pub tapback_type: TapbackType,
    pub is_addition: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StickerItem {
    pub message_guid: String,
    pub message_index: u32,
    #[serde(default)]
    pub sender: Option<String>,
    pub guid: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    pub query: String,
    /// `None` searches every chat.
    #[serde(default)]
    pub chat_guids: Option<Vec<String>>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl SearchOptions {
    /// Cache key: the same search written differently maps to one entry.
    pub fn normalized_key(&self) -> String {
        let query = self.query.trim().to_lowercase();
        let scope = match self.chat_guids.as_ref() {
            None => "*".to_string(),
            Some(guids) => {
                let set: BTreeSet<&str> = guids.iter().map(String::as_str).collect();
                set.into_iter().collect::<Vec<_>>().join(",")
            }
        };
        let limit = self
            .limit
            .map(|l| l.to_string())
            .unwrap_or_else(|| "-".to_string());
        format!("{query}|{scope}|{limit}")
    }

    pub fn scope(&self) -> Option<BTreeSet<String>> {
        self.chat_guids
            .as_ref()
            .map(|guids| guids.iter().cloned().collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub message_guid: String,
    pub chat_guid: String,
    pub date: i64,
    #[serde(default)]
    pub sender: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanTotals {
    pub conversations: usize,
    pub messages: usize,
}

/// Phone numbers keep digits (and a leading `+`), everything else is compared
/// case-insensitively.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    if trimmed.contains('@') {
        return trimmed.to_lowercase();
    }
    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    let looks_like_phone = !digits.is_empty()
        && trimmed
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' ' | '.'));
    if !looks_like_phone {
        return trimmed.to_lowercase();
    }
    if trimmed.starts_with('+') {
        format!("+{digits}")
    } else {
        digits
    }
}

pub fn normalized_member_set(members: &[String]) -> BTreeSet<String> {
    members.iter().map(|m| normalize_address(m)).collect()
}
