//! Offline server backed by a JSON fixture. Used by the `bbsync replay`
//! command and by integration tests.

use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use futures::future::{self, BoxFuture};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::model::{
    Attachment, ConversationItem, MessageModifier, RemoteConversation, ScanTotals, SearchHit,
    SearchOptions,
};
use crate::server::{InfoResults, ServerApi};

/// One inbound delivery, replayed in file order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "items", rename_all = "camelCase")]
pub enum FixtureBatch {
    Messages(Vec<ConversationItem>),
    Modifiers(Vec<MessageModifier>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fixture {
    #[serde(default)]
    pub conversations: Vec<RemoteConversation>,
    #[serde(default)]
    pub attachments: HashMap<String, Vec<Attachment>>,
    #[serde(default)]
    pub search_hits: Vec<SearchHit>,
    #[serde(default)]
    pub batches: Vec<FixtureBatch>,
}

impl Fixture {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read fixture {}", path.display()))?;
        serde_json::from_slice(&bytes).with_context(|| format!("parse fixture {}", path.display()))
    }
}

/// Serves a fixture's conversations, attachments and search hits. Chats the
/// fixture does not list answer `NotFound`.
pub struct FixtureServer {
    conversations: Vec<RemoteConversation>,
    attachments: HashMap<String, Vec<Attachment>>,
    search_hits: Vec<SearchHit>,
}

impl FixtureServer {
    pub fn new(fixture: &Fixture) -> Self {
        Self {
            conversations: fixture.conversations.clone(),
            attachments: fixture.attachments.clone(),
            search_hits: fixture.search_hits.clone(),
        }
    }

    fn page(&self, offset: usize, limit: usize) -> Vec<RemoteConversation> {
        self.conversations
            .iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect()
    }
}

impl ServerApi for FixtureServer {
    fn fetch_conversation_info(&self, guids: Vec<String>) -> BoxFuture<'static, InfoResults> {
        let results = guids
            .into_iter()
            .map(|guid| {
                let found = self
                    .conversations
                    .iter()
                    .find(|c| c.guid == guid)
                    .cloned()
                    .ok_or_else(|| FetchError::NotFound(guid.clone()));
                (guid, found)
            })
            .collect();
        Box::pin(future::ready(results))
    }

    fn fetch_conversations(
        &self,
        count: usize,
    ) -> BoxFuture<'static, Result<Vec<RemoteConversation>, FetchError>> {
        Box::pin(future::ready(Ok(self.page(0, count))))
    }

    fn fetch_conversation_scan_totals(&self) -> BoxFuture<'static, Result<ScanTotals, FetchError>> {
        let messages = self
            .conversations
            .iter()
            .filter(|c| c.preview.date().is_some())
            .count();
        Box::pin(future::ready(Ok(ScanTotals {
            conversations: self.conversations.len(),
            messages,
        })))
    }

    fn fetch_conversation_scan_page(
        &self,
        offset: usize,
        limit: usize,
    ) -> BoxFuture<'static, Result<Vec<RemoteConversation>, FetchError>> {
        Box::pin(future::ready(Ok(self.page(offset, limit))))
    }

    fn fetch_chat_attachments(
        &self,
        chat_guid: String,
    ) -> BoxFuture<'static, Result<Vec<Attachment>, FetchError>> {
        let result = match self.attachments.get(&chat_guid) {
            Some(list) => Ok(list.clone()),
            None if self.conversations.iter().any(|c| c.guid == chat_guid) => Ok(Vec::new()),
            None => Err(FetchError::NotFound(chat_guid)),
        };
        Box::pin(future::ready(result))
    }

    fn search_messages(
        &self,
        options: SearchOptions,
    ) -> BoxFuture<'static, Result<Vec<SearchHit>, FetchError>> {
        let needle = options.query.trim().to_lowercase();
        let scope = options.scope();
        let mut hits: Vec<SearchHit> = self
            .search_hits
            .iter()
            .filter(|h| scope.as_ref().map_or(true, |s| s.contains(&h.chat_guid)))
            .filter(|h| {
                h.text
                    .as_deref()
                    .is_some_and(|t| t.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect();
        hits.sort_by(|a, b| b.date.cmp(&a.date));
        if let Some(limit) = options.limit {
            hits.truncate(limit);
        }
        Box::pin(future::ready(Ok(hits)))
    }
}
