// Message batch reconciliation: the single ordered pipeline every inbound
// batch goes through (conversation state -> cache invalidation -> notifications).

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use crate::identity::ConversationId;
use crate::model::{
    normalize_address, ConversationItem, ConversationPreview, LocalId, MessageItem,
    ParticipantActionType, RemoteConversation,
};
use crate::notify::{MessageNotification, SoundCue};
use crate::server::InfoResults;
use crate::updates::{CoreMsg, InternalEvent, PendingDispatch};

use super::AppCore;

/// Items of one known conversation within a batch, plus the preview date the
/// conversation had before the batch touched it.
struct ResolvedGroup {
    local_id: LocalId,
    items: Vec<ConversationItem>,
    before: Option<i64>,
}

impl AppCore {
    pub(super) fn apply_update_messages(&mut self, items: Vec<ConversationItem>) {
        if items.is_empty() {
            return;
        }

        // 1. Partition by identity, keeping per-identity arrival order.
        let mut groups: Vec<(ConversationId, Vec<ConversationItem>)> = Vec::new();
        let mut group_index: HashMap<ConversationId, usize> = HashMap::new();
        for item in &items {
            let Some(id) = item.conversation_id() else {
                tracing::trace!(guid = ?item.header().guid, "item without conversation reference dropped");
                continue;
            };
            match group_index.get(&id) {
                Some(&i) => groups[i].1.push(item.clone()),
                None => {
                    group_index.insert(id.clone(), groups.len());
                    groups.push((id, vec![item.clone()]));
                }
            }
        }

        // 2 + 3. Snapshot preview dates of known conversations; buffer the rest.
        let mut resolved: Vec<ResolvedGroup> = Vec::new();
        let mut to_fetch: Vec<String> = Vec::new();
        for (id, group_items) in groups {
            match self.conversations.resolve(&id) {
                Some(local_id) => {
                    // A batch can reference one conversation by both local id and guid.
                    if let Some(existing) = resolved.iter_mut().find(|g| g.local_id == local_id) {
                        existing.items.extend(group_items);
                        continue;
                    }
                    let before = self
                        .conversations
                        .get(local_id)
                        .and_then(|c| c.preview_date());
                    resolved.push(ResolvedGroup {
                        local_id,
                        items: group_items,
                        before,
                    });
                }
                None => match id {
                    ConversationId::Remote(guid) => {
                        if self.buffer_pending(guid.clone(), group_items) {
                            to_fetch.push(guid);
                        }
                    }
                    ConversationId::Local(local_id) => {
                        tracing::trace!(%local_id, count = group_items.len(), "unknown local conversation; items dropped");
                    }
                },
            }
        }

        // 4 + 5. Previews, unread, ordering, membership, names, timelines.
        for group in &resolved {
            self.apply_group(group);
        }

        // Cache invalidation sees the whole batch; buffered chats are noted on replay.
        let conversations = &self.conversations;
        if self
            .media_cache
            .note_messages(&items, |guid| conversations.get_by_guid(guid).is_some())
        {
            self.schedule_media_stale_flush();
        }
        if self.search_cache.note_messages(&items) > 0 {
            self.refresh_search_staleness();
        }

        // 6. Notification classification against the pre-batch snapshot.
        if self.state.interactive {
            self.classify_notifications(&resolved);
        }

        if !to_fetch.is_empty() {
            self.request_conversation_info(to_fetch);
        }

        self.emit_state();
    }

    fn apply_group(&mut self, group: &ResolvedGroup) {
        let local_id = group.local_id;
        let before = group.before;

        let latest = group
            .items
            .iter()
            .filter_map(ConversationItem::as_message)
            .max_by_key(|m| m.header.date);
        if let Some(latest) = latest {
            let date = latest.header.date;
            let take_preview = before.map_or(true, |b| date >= b);
            let mark_unread = latest.is_incoming()
                && before.map_or(true, |b| date > b)
                && self.state.active_conversation != Some(local_id);
            if take_preview {
                let preview = ConversationPreview::from_message(latest);
                let preview_changed = self
                    .conversations
                    .get(local_id)
                    .is_some_and(|c| c.preview != preview);
                self.conversations.update(local_id, |c| {
                    c.preview = preview;
                    if mark_unread {
                        c.unread_messages = true;
                    }
                });
                if preview_changed {
                    self.conversations.reposition(local_id);
                }
            }
        }

        for item in &group.items {
            match item {
                ConversationItem::Message(_) => {}
                ConversationItem::ParticipantAction(action) => {
                    // The local user is never in their own member list.
                    let Some(target) = action.target.clone() else {
                        continue;
                    };
                    let kind = action.kind;
                    self.conversations.update(local_id, |c| {
                        let normalized = normalize_address(&target);
                        let present = c.members.iter().any(|m| normalize_address(m) == normalized);
                        match kind {
                            ParticipantActionType::Join if !present => c.members.push(target),
                            ParticipantActionType::Join => {}
                            ParticipantActionType::Leave => {
                                c.members.retain(|m| normalize_address(m) != normalized)
                            }
                        }
                    });
                }
                ConversationItem::ChatRenameAction(rename) => {
                    let name = rename.chat_name.clone();
                    self.conversations.update(local_id, |c| c.name = Some(name));
                }
            }
        }

        let linked = self
            .conversations
            .get(local_id)
            .is_some_and(|c| c.is_linked());
        for item in &group.items {
            if linked {
                self.timelines.upsert(local_id, item.clone());
            } else {
                self.local_cache.upsert(local_id, item.clone());
            }
        }
    }

    fn classify_notifications(&mut self, resolved: &[ResolvedGroup]) {
        let mut candidates = Vec::new();
        for group in resolved {
            let Some(conversation) = self.conversations.get(group.local_id) else {
                continue;
            };
            if !conversation.is_linked() {
                continue;
            }
            let fresh: Vec<MessageItem> = group
                .items
                .iter()
                .filter_map(ConversationItem::as_message)
                .filter(|m| m.is_incoming())
                .filter(|m| group.before.map_or(true, |b| m.header.date > b))
                .cloned()
                .collect();
            if fresh.is_empty() {
                continue;
            }
            candidates.push(MessageNotification {
                conversation: conversation.clone(),
                messages: fresh,
            });
        }
        if candidates.is_empty() {
            return;
        }

        let dispatch = PendingDispatch {
            candidates,
            active: self.state.active_conversation,
        };
        let focus = self.notifier.has_focus();
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            let focused = focus.await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::FocusResolved {
                dispatch,
                focused,
            })));
        });
    }

    pub(super) fn handle_focus_resolved(&mut self, dispatch: PendingDispatch, focused: bool) {
        let PendingDispatch { candidates, active } = dispatch;
        let (in_view, elsewhere): (Vec<_>, Vec<_>) = candidates
            .into_iter()
            .partition(|n| focused && Some(n.conversation.local_id) == active);

        if !elsewhere.is_empty() {
            for notification in elsewhere {
                tracing::debug!(local_id = %notification.conversation.local_id, count = notification.messages.len(), "notify");
                self.notifier.notify_messages(notification);
            }
            return;
        }
        if let Some(notification) = in_view.into_iter().next() {
            self.notifier.play_sound(SoundCue::MessageArrived {
                conversation: notification.conversation,
                messages: notification.messages,
            });
        }
    }

    /// Returns true when this guid has no fetch in flight yet.
    fn buffer_pending(&mut self, guid: String, items: Vec<ConversationItem>) -> bool {
        match self.pending.entry(guid) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().extend(items);
                false
            }
            Entry::Vacant(entry) => {
                tracing::debug!(guid = %entry.key(), count = items.len(), "buffering items for unknown conversation");
                entry.insert(items);
                true
            }
        }
    }

    fn request_conversation_info(&mut self, guids: Vec<String>) {
        let fetch = self.server.fetch_conversation_info(guids);
        let tx = self.core_sender.clone();
        let session = self.session;
        let handle = self.runtime.spawn(async move {
            let results = fetch.await;
            let _ = tx.send(CoreMsg::Internal(Box::new(
                InternalEvent::ConversationInfoFetched { session, results },
            )));
        });
        self.info_tasks.retain(|h| !h.is_finished());
        self.info_tasks.push(handle.abort_handle());
    }

    pub(super) fn handle_conversation_info_fetched(&mut self, session: u64, results: InfoResults) {
        if session != self.session {
            tracing::debug!(session, "conversation info from a previous session ignored");
            return;
        }
        let mut replay: Vec<ConversationItem> = Vec::new();
        for (guid, result) in results {
            let Some(buffered) = self.pending.remove(&guid) else {
                continue;
            };
            match result {
                Err(e) => {
                    tracing::debug!(guid = %guid, err = %e, dropped = buffered.len(), "conversation info fetch failed; buffered items dropped");
                }
                Ok(mut remote) => {
                    if remote.guid != guid {
                        tracing::debug!(requested = %guid, returned = %remote.guid, "server returned a different guid");
                        remote.guid = guid;
                    }
                    self.link_fetched_conversation(remote, &buffered);
                    replay.extend(buffered);
                }
            }
        }
        self.emit_state();

        // Replayed after the new conversation is visible in the list.
        if !replay.is_empty() {
            let _ = self.core_sender.send(CoreMsg::Internal(Box::new(
                InternalEvent::MessagesReceived { items: replay },
            )));
        }
    }

    fn link_fetched_conversation(&mut self, mut remote: RemoteConversation, buffered: &[ConversationItem]) {
        if self.conversations.get_by_guid(&remote.guid).is_some() {
            return;
        }
        if let Some(local_id) = self
            .conversations
            .find_local_only_match(&remote.service, &remote.members)
        {
            if self.conversations.relink(local_id, &remote) {
                self.local_cache.invalidate(local_id);
                tracing::info!(%local_id, guid = %remote.guid, "local conversation linked");
                return;
            }
        }
        // The server preview usually already shows the buffered message; the
        // replay must still see it as new.
        let newest = buffered
            .iter()
            .filter_map(ConversationItem::as_message)
            .map(|m| m.header.date)
            .max();
        if let (Some(newest), Some(preview_date)) = (newest, remote.preview.date()) {
            if newest >= preview_date {
                remote.preview = ConversationPreview::Empty;
            }
        }
        let guid = remote.guid.clone();
        let local_id = self.conversations.insert_remote(remote);
        tracing::info!(%local_id, guid = %guid, "conversation inserted from server");
    }
}
