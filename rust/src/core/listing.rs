// Paginated conversation listing and full conversation scans.

use std::sync::Arc;

use crate::error::FetchError;
use crate::model::{normalize_address, LocalId, RemoteConversation};
use crate::server::ServerApi;
use crate::state::ScanView;
use crate::updates::{CoreMsg, InternalEvent, ScanOutcome};

use super::AppCore;

impl AppCore {
    pub(super) fn load_conversations(&mut self) {
        let page = self.config.conversation_page_size();
        if self.state.visible_limit == 0 {
            self.state.visible_limit = page;
        }
        let count = self.state.visible_limit.max(page);
        self.fetch_conversation_list(count);
    }

    pub(super) fn load_more_conversations(&mut self) {
        if self.state.loading_conversations {
            return;
        }
        let page = self.config.conversation_page_size();
        self.state.visible_limit = self.state.visible_limit.saturating_add(page);
        if self.conversations.len() < self.state.visible_limit && self.state.has_more_conversations
        {
            self.fetch_conversation_list(self.state.visible_limit);
        } else {
            self.emit_state();
        }
    }

    fn fetch_conversation_list(&mut self, count: usize) {
        if let Some(handle) = self.list_task.take() {
            handle.abort();
        }
        self.list_token = self.list_token.wrapping_add(1);
        let token = self.list_token;
        let fetch = self.server.fetch_conversations(count);
        let tx = self.core_sender.clone();
        let handle = self.runtime.spawn(async move {
            let result = fetch.await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ConversationsLoaded {
                    token,
                    requested: count,
                    result,
                },
            )));
        });
        self.list_task = Some(handle.abort_handle());
        self.state.loading_conversations = true;
        self.state.conversations_error = None;
        self.emit_state();
    }

    pub(super) fn handle_conversations_loaded(
        &mut self,
        token: u64,
        requested: usize,
        result: Result<Vec<RemoteConversation>, FetchError>,
    ) {
        if token != self.list_token {
            return;
        }
        self.list_task = None;
        self.state.loading_conversations = false;
        match result {
            Ok(remotes) => {
                tracing::info!(count = remotes.len(), requested, "conversations loaded");
                self.state.has_more_conversations = remotes.len() >= requested;
                for remote in remotes {
                    self.merge_remote_conversation(remote);
                }
            }
            Err(e) => {
                tracing::warn!(err = %e, "conversation list fetch failed");
                self.state.conversations_error = Some(e.to_string());
            }
        }
        self.emit_state();
    }

    /// Folds a listed server conversation into the list: update the linked
    /// entry, link a matching local-only one, or insert.
    pub(super) fn merge_remote_conversation(&mut self, remote: RemoteConversation) {
        let existing = self.conversations.get_by_guid(&remote.guid).map(|c| c.local_id);
        let target = existing.or_else(|| {
            let local_id = self
                .conversations
                .find_local_only_match(&remote.service, &remote.members)?;
            if !self.conversations.relink(local_id, &remote) {
                return None;
            }
            self.local_cache.invalidate(local_id);
            tracing::info!(%local_id, guid = %remote.guid, "local conversation linked from listing");
            Some(local_id)
        });
        match target {
            Some(local_id) => self.refresh_from_remote(local_id, remote),
            None => {
                self.conversations.insert_remote(remote);
            }
        }
    }

    fn refresh_from_remote(&mut self, local_id: LocalId, remote: RemoteConversation) {
        let Some(current) = self.conversations.get(local_id) else {
            return;
        };
        let newer = match (current.preview_date(), remote.preview.date()) {
            (_, None) => false,
            (None, Some(_)) => true,
            (Some(mine), Some(theirs)) => theirs >= mine,
        };
        let preview_changed = newer && current.preview != remote.preview;
        let active = self.state.active_conversation == Some(local_id);
        self.conversations.update(local_id, |c| {
            c.members = remote.members;
            if remote.name.is_some() {
                c.name = remote.name;
            }
            if newer {
                c.preview = remote.preview;
                if remote.unread_messages && !active {
                    c.unread_messages = true;
                }
            }
        });
        if preview_changed {
            self.conversations.reposition(local_id);
        }
    }

    pub(super) fn scan_conversations(&mut self, query: String) {
        if let Some(handle) = self.scan_task.take() {
            handle.abort();
        }
        self.scan_token = self.scan_token.wrapping_add(1);
        let token = self.scan_token;
        let server = self.server.clone();
        let page_size = self.config.scan_page_size();
        let needle = query.clone();
        let tx = self.core_sender.clone();
        let handle = self.runtime.spawn(async move {
            let result = run_scan(server, &needle, page_size).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ScanCompleted {
                token,
                result,
            })));
        });
        self.scan_task = Some(handle.abort_handle());
        self.state.scan = Some(ScanView {
            query,
            totals: None,
            scanned: 0,
            matches: Vec::new(),
            loading: true,
            error: None,
        });
        self.emit_state();
    }

    pub(super) fn handle_scan_completed(
        &mut self,
        token: u64,
        result: Result<ScanOutcome, FetchError>,
    ) {
        if token != self.scan_token {
            return;
        }
        self.scan_task = None;
        let Some(view) = self.state.scan.as_mut() else {
            return;
        };
        view.loading = false;
        match result {
            Ok(outcome) => {
                tracing::info!(scanned = outcome.scanned, matches = outcome.matches.len(), "scan complete");
                view.totals = Some(outcome.totals);
                view.scanned = outcome.scanned;
                view.matches = outcome.matches;
                view.error = None;
            }
            Err(e) => {
                tracing::warn!(err = %e, "conversation scan failed");
                view.error = Some(e.to_string());
            }
        }
        self.emit_state();
    }
}

/// Pages through every server conversation and keeps the ones matching the
/// query by name, member address, guid or preview text.
async fn run_scan(
    server: Arc<dyn ServerApi>,
    query: &str,
    page_size: usize,
) -> Result<ScanOutcome, FetchError> {
    let totals = server.fetch_conversation_scan_totals().await?;
    let needle = query.trim().to_lowercase();
    let mut scanned = 0;
    let mut matches = Vec::new();
    while scanned < totals.conversations {
        let page = server
            .fetch_conversation_scan_page(scanned, page_size)
            .await?;
        if page.is_empty() {
            break;
        }
        scanned += page.len();
        matches.extend(page.into_iter().filter(|c| conversation_matches(c, &needle)));
    }
    Ok(ScanOutcome {
        totals,
        scanned,
        matches,
    })
}

fn conversation_matches(conversation: &RemoteConversation, needle: &str) -> bool {
    if needle.is_empty() {
        return true;
    }
    let normalized_needle = normalize_address(needle);
    let name = conversation
        .name
        .as_deref()
        .is_some_and(|n| n.to_lowercase().contains(needle));
    let member = conversation.members.iter().any(|m| {
        m.to_lowercase().contains(needle) || normalize_address(m).contains(&normalized_needle)
    });
    let preview = match &conversation.preview {
        crate::model::ConversationPreview::Message(p) => p
            .text
            .as_deref()
            .is_some_and(|t| t.to_lowercase().contains(needle)),
        crate::model::ConversationPreview::Empty => false,
    };
    name || member || preview || conversation.guid.to_lowercase().contains(needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ConversationPreview, MessagePreview};

    fn remote(name: Option<&str>, members: &[&str], text: Option<&str>) -> RemoteConversation {
        RemoteConversation {
            guid: "iMessage;+;chat42".into(),
            service: "iMessage".into(),
            members: members.iter().map(|m| m.to_string()).collect(),
            name: name.map(str::to_string),
            preview: ConversationPreview::Message(MessagePreview {
                date: 1,
                text: text.map(str::to_string),
                send_style: None,
                attachments: vec![],
            }),
            unread_messages: false,
        }
    }

    #[test]
    fn scan_matching_covers_names_members_and_previews() {
        let c = remote(Some("Book Club"), &["+1 (555) 000-1111"], Some("See you Friday"));
        assert!(conversation_matches(&c, "book"));
        assert!(conversation_matches(&c, "5550001111"));
        assert!(conversation_matches(&c, "friday"));
        assert!(conversation_matches(&c, "chat42"));
        assert!(conversation_matches(&c, ""));
        assert!(!conversation_matches(&c, "dinner"));
    }
}
