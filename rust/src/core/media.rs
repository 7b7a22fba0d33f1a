// Attachment drawer: session media cache, debounced staleness, refetch.

use crate::error::FetchError;
use crate::model::Attachment;
use crate::state::MediaView;
use crate::updates::{CoreMsg, InternalEvent};

use super::AppCore;

impl AppCore {
    pub(super) fn load_conversation_media(&mut self, chat_guid: String) {
        self.cancel_media_fetch();
        let cached = self
            .media_cache
            .get(&chat_guid)
            .map(|lookup| (lookup.value.clone(), lookup.stale));
        let view = match cached {
            Some((attachments, stale)) => MediaView {
                chat_guid: chat_guid.clone(),
                attachments,
                loading: stale,
                error: None,
                from_cache: true,
                stale,
            },
            None => MediaView {
                chat_guid: chat_guid.clone(),
                attachments: Vec::new(),
                loading: true,
                error: None,
                from_cache: false,
                stale: false,
            },
        };
        let needs_fetch = view.loading;
        self.state.media = Some(view);
        if needs_fetch {
            self.spawn_media_fetch(chat_guid);
        }
        self.emit_state();
    }

    pub(super) fn close_media(&mut self) {
        self.cancel_media_fetch();
        if self.state.media.take().is_some() {
            self.emit_state();
        }
    }

    /// Aborted fetches never reach the cache: their token is outdated.
    pub(super) fn cancel_media_fetch(&mut self) {
        if let Some(handle) = self.media_task.take() {
            handle.abort();
        }
        self.media_token = self.media_token.wrapping_add(1);
    }

    fn spawn_media_fetch(&mut self, chat_guid: String) {
        self.media_token = self.media_token.wrapping_add(1);
        let token = self.media_token;
        let session = self.session;
        let fetch = self.server.fetch_chat_attachments(chat_guid.clone());
        let tx = self.core_sender.clone();
        let handle = self.runtime.spawn(async move {
            let result = fetch.await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MediaFetched {
                token,
                session,
                chat_guid,
                result,
            })));
        });
        self.media_task = Some(handle.abort_handle());
    }

    pub(super) fn handle_media_fetched(
        &mut self,
        token: u64,
        session: u64,
        chat_guid: String,
        result: Result<Vec<Attachment>, FetchError>,
    ) {
        if token != self.media_token || session != self.session {
            tracing::debug!(chat_guid = %chat_guid, "outdated media result ignored");
            return;
        }
        self.media_task = None;
        match result {
            Ok(attachments) => {
                self.media_cache.store(&chat_guid, attachments.clone());
                if let Some(view) = self.state.media.as_mut() {
                    if view.chat_guid == chat_guid {
                        view.attachments = attachments;
                        view.loading = false;
                        view.error = None;
                        view.from_cache = false;
                        view.stale = false;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(chat_guid = %chat_guid, err = %e, "media fetch failed");
                if let Some(view) = self.state.media.as_mut() {
                    if view.chat_guid == chat_guid {
                        // Keep whatever was cached; the flags tell the UI it is old.
                        view.loading = false;
                        view.error = Some(e.to_string());
                    }
                }
            }
        }
        self.emit_state();
    }

    pub(super) fn schedule_media_stale_flush(&self) {
        let debounce = self.media_cache.debounce();
        let session = self.session;
        let tx = self.core_sender.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MediaStaleFlush {
                session,
            })));
        });
    }

    pub(super) fn handle_media_stale_flush(&mut self, session: u64) {
        if session != self.session {
            return;
        }
        let stale = self.media_cache.flush_pending();
        for chat_guid in &stale {
            self.media_stale.emit(chat_guid);
        }

        let visible = self
            .state
            .media
            .as_ref()
            .map(|v| v.chat_guid.clone())
            .filter(|guid| stale.contains(guid));
        let Some(chat_guid) = visible else {
            return;
        };
        tracing::debug!(chat_guid = %chat_guid, "visible media went stale; refetching");
        self.cancel_media_fetch();
        if let Some(view) = self.state.media.as_mut() {
            view.stale = true;
            view.loading = true;
        }
        self.spawn_media_fetch(chat_guid);
        self.emit_state();
    }
}
