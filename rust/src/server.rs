//! Server collaborators consumed by the core, plus a reqwest client for the
//! BlueBubbles REST API.

use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use url::Url;

use crate::error::FetchError;
use crate::model::{
    Attachment, ConversationPreview, MessagePreview, RemoteConversation, ScanTotals, SearchHit,
    SearchOptions,
};

pub type InfoResults = Vec<(String, Result<RemoteConversation, FetchError>)>;

pub trait ServerApi: Send + Sync + 'static {
    /// One result per requested guid, in request order.
    fn fetch_conversation_info(&self, guids: Vec<String>) -> BoxFuture<'static, InfoResults>;

    /// Most recently active conversations first.
    fn fetch_conversations(
        &self,
        count: usize,
    ) -> BoxFuture<'static, Result<Vec<RemoteConversation>, FetchError>>;

    fn fetch_conversation_scan_totals(&self) -> BoxFuture<'static, Result<ScanTotals, FetchError>>;

    fn fetch_conversation_scan_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> BoxFuture<'static, Result<Vec<RemoteConversation>, FetchError>>;

    fn fetch_chat_attachments(
        &self,
        chat_guid: String,
    ) -> BoxFuture<'static, Result<Vec<Attachment>, FetchError>>;

    fn search_messages(
        &self,
        options: SearchOptions,
    ) -> BoxFuture<'static, Result<Vec<SearchHit>, FetchError>>;
}

const ATTACHMENT_QUERY_LIMIT: usize = 200;
const DEFAULT_SEARCH_LIMIT: usize = 50;

/// Response envelope used by every `/api/v1` endpoint.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    status: u16,
    #[serde(default)]
    message: Option<String>,
    data: Option<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiHandle {
    address: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiAttachment {
    guid: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    transfer_name: Option<String>,
    #[serde(default)]
    total_bytes: Option<u64>,
}

impl From<ApiAttachment> for Attachment {
    fn from(a: ApiAttachment) -> Self {
        Attachment {
            guid: a.guid,
            mime_type: a.mime_type,
            name: a.transfer_name,
            size: a.total_bytes,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiChatRef {
    guid: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiMessage {
    guid: String,
    #[serde(default)]
    text: Option<String>,
    date_created: i64,
    #[serde(default)]
    is_from_me: bool,
    #[serde(default)]
    handle: Option<ApiHandle>,
    #[serde(default)]
    expressive_send_style_id: Option<String>,
    #[serde(default)]
    attachments: Vec<ApiAttachment>,
    #[serde(default)]
    chats: Vec<ApiChatRef>,
}

impl ApiMessage {
    fn preview(&self) -> ConversationPreview {
        ConversationPreview::Message(MessagePreview {
            date: self.date_created,
            text: self.text.clone(),
            send_style: self.expressive_send_style_id.clone(),
            attachments: self
                .attachments
                .iter()
                .map(|a| {
                    a.mime_type
                        .clone()
                        .or_else(|| a.transfer_name.clone())
                        .unwrap_or_else(|| "attachment".to_string())
                })
                .collect(),
        })
    }

    fn sender(&self) -> Option<String> {
        if self.is_from_me {
            return None;
        }
        self.handle.as_ref().map(|h| h.address.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApiChat {
    guid: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    participants: Vec<ApiHandle>,
    #[serde(default)]
    last_message: Option<ApiMessage>,
    #[serde(default)]
    has_unread_message: Option<bool>,
}

/// `iMessage;-;+15551234567` carries its service as the first segment.
fn service_from_guid(guid: &str) -> String {
    guid.split(';')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("iMessage")
        .to_string()
}

impl From<ApiChat> for RemoteConversation {
    fn from(chat: ApiChat) -> Self {
        let preview = chat
            .last_message
            .as_ref()
            .map(ApiMessage::preview)
            .unwrap_or_default();
        RemoteConversation {
            service: service_from_guid(&chat.guid),
            guid: chat.guid,
            members: chat.participants.into_iter().map(|h| h.address).collect(),
            name: chat.display_name.filter(|n| !n.trim().is_empty()),
            preview,
            unread_messages: chat.has_unread_message.unwrap_or(false),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiCount {
    total: usize,
}

/// Talks to a BlueBubbles server over HTTP. Cheap to clone.
#[derive(Debug, Clone)]
pub struct HttpServerApi {
    client: reqwest::Client,
    base: Url,
    password: String,
}

impl HttpServerApi {
    pub fn new(server_url: &str, password: impl Into<String>) -> anyhow::Result<Self> {
        use anyhow::Context;

        let mut base = Url::parse(server_url.trim())
            .with_context(|| format!("invalid server url {server_url:?}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        Ok(Self {
            client: reqwest::Client::new(),
            base,
            password: password.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, FetchError> {
        let mut url = self
            .base
            .join(path)
            .map_err(|e| FetchError::Decode(format!("bad endpoint {path}: {e}")))?;
        url.query_pairs_mut().append_pair("password", &self.password);
        Ok(url)
    }

    async fn read<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, FetchError> {
        let status = resp.status().as_u16();
        if status == 404 {
            return Err(FetchError::NotFound(resp.url().path().to_string()));
        }
        if !resp.status().is_success() {
            return Err(FetchError::Status(status));
        }
        let envelope: Envelope<T> = resp.json().await?;
        if envelope.status != 200 {
            tracing::debug!(status = envelope.status, message = ?envelope.message, "server error envelope");
            return Err(FetchError::Status(envelope.status));
        }
        envelope
            .data
            .ok_or_else(|| FetchError::Decode("missing data".to_string()))
    }

    async fn get<T: DeserializeOwned>(
        client: reqwest::Client,
        url: Url,
    ) -> Result<T, FetchError> {
        let resp = client.get(url).send().await?;
        Self::read(resp).await
    }

    async fn post<T: DeserializeOwned>(
        client: reqwest::Client,
        url: Url,
        body: serde_json::Value,
    ) -> Result<T, FetchError> {
        let resp = client.post(url).json(&body).send().await?;
        Self::read(resp).await
    }

    fn chat_query(
        &self,
        offset: usize,
        limit: usize,
    ) -> BoxFuture<'static, Result<Vec<RemoteConversation>, FetchError>> {
        let client = self.client.clone();
        let url = self.endpoint("api/v1/chat/query");
        Box::pin(async move {
            let body = serde_json::json!({
                "offset": offset,
                "limit": limit,
                "with": ["participants", "lastMessage"],
                "sort": "lastmessage",
            });
            let chats: Vec<ApiChat> = Self::post(client, url?, body).await?;
            Ok(chats.into_iter().map(RemoteConversation::from).collect())
        })
    }
}

impl ServerApi for HttpServerApi {
    fn fetch_conversation_info(&self, guids: Vec<String>) -> BoxFuture<'static, InfoResults> {
        let requests: Vec<(String, Result<Url, FetchError>)> = guids
            .into_iter()
            .map(|guid| {
                let url = self.endpoint(&format!("api/v1/chat/{}", encode_segment(&guid)));
                let url = url.map(|mut u| {
                    u.query_pairs_mut()
                        .append_pair("with", "participants,lastmessage");
                    u
                });
                (guid, url)
            })
            .collect();
        let client = self.client.clone();
        Box::pin(async move {
            let fetches = requests.into_iter().map(|(guid, url)| {
                let client = client.clone();
                async move {
                    let result = match url {
                        Ok(url) => Self::get::<ApiChat>(client, url)
                            .await
                            .map(RemoteConversation::from),
                        Err(e) => Err(e),
                    };
                    (guid, result)
                }
            });
            futures::future::join_all(fetches).await
        })
    }

    fn fetch_conversations(
        &self,
        count: usize,
    ) -> BoxFuture<'static, Result<Vec<RemoteConversation>, FetchError>> {
        self.chat_query(0, count)
    }

    fn fetch_conversation_scan_totals(&self) -> BoxFuture<'static, Result<ScanTotals, FetchError>> {
        let client = self.client.clone();
        let chats = self.endpoint("api/v1/chat/count");
        let messages = self.endpoint("api/v1/message/count");
        Box::pin(async move {
            let chats: ApiCount = Self::get(client.clone(), chats?).await?;
            let messages: ApiCount = Self::get(client, messages?).await?;
            Ok(ScanTotals {
                conversations: chats.total,
                messages: messages.total,
            })
        })
    }

    fn fetch_conversation_scan_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> BoxFuture<'static, Result<Vec<RemoteConversation>, FetchError>> {
        self.chat_query(offset, limit)
    }

    fn fetch_chat_attachments(
        &self,
        chat_guid: String,
    ) -> BoxFuture<'static, Result<Vec<Attachment>, FetchError>> {
        let client = self.client.clone();
        let url = self.endpoint("api/v1/message/query");
        Box::pin(async move {
            let body = serde_json::json!({
                "chatGuid": chat_guid,
                "with": ["attachment"],
                "limit": ATTACHMENT_QUERY_LIMIT,
                "sort": "DESC",
            });
            let messages: Vec<ApiMessage> = Self::post(client, url?, body).await?;
            Ok(messages
                .into_iter()
                .flat_map(|m| m.attachments)
                .map(Attachment::from)
                .collect())
        })
    }

    fn search_messages(
        &self,
        options: SearchOptions,
    ) -> BoxFuture<'static, Result<Vec<SearchHit>, FetchError>> {
        let client = self.client.clone();
        let url = self.endpoint("api/v1/message/query");
        Box::pin(async move {
            let url = url?;
            let limit = options.limit.unwrap_or(DEFAULT_SEARCH_LIMIT);
            let pattern = format!("%{}%", options.query.trim());
            let scopes: Vec<Option<String>> = match options.chat_guids {
                Some(guids) => guids.into_iter().map(Some).collect(),
                None => vec![None],
            };
            let mut hits = Vec::new();
            for chat_guid in scopes {
                let mut body = serde_json::json!({
                    "where": [{
                        "statement": "message.text LIKE :text",
                        "args": { "text": pattern },
                    }],
                    "with": ["chat"],
                    "limit": limit,
                    "sort": "DESC",
                });
                if let Some(guid) = &chat_guid {
                    body["chatGuid"] = serde_json::Value::String(guid.clone());
                }
                let messages: Vec<ApiMessage> = Self::post(client.clone(), url.clone(), body).await?;
                for message in messages {
                    let Some(chat) = chat_guid
                        .clone()
                        .or_else(|| message.chats.first().map(|c| c.guid.clone()))
                    else {
                        continue;
                    };
                    hits.push(SearchHit {
                        sender: message.sender(),
                        message_guid: message.guid,
                        chat_guid: chat,
                        date: message.date_created,
                        text: message.text,
                    });
                }
            }
            hits.sort_by(|a, b| b.date.cmp(&a.date));
            hits.truncate(limit);
            Ok(hits)
        })
    }
}

/// Percent-encodes a single path segment (chat guids contain `;` and `+`).
fn encode_segment(segment: &str) -> String {
    url::form_urlencoded::byte_serialize(segment.as_bytes())
        .collect::<String>()
        .replace('+', "%20")
}
