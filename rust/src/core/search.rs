// Message search backed by the session search cache.

use crate::error::FetchError;
use crate::model::{SearchHit, SearchOptions};
use crate::state::SearchView;
use crate::updates::{CoreMsg, InternalEvent};

use super::AppCore;

impl AppCore {
    pub(super) fn search(&mut self, options: SearchOptions) {
        self.cancel_search_fetch();
        if options.query.trim().is_empty() {
            self.clear_search();
            return;
        }
        let cached = self
            .search_cache
            .get(&options)
            .map(|lookup| (lookup.value.hits.clone(), lookup.stale));
        let view = match cached {
            Some((hits, stale)) => SearchView {
                options: options.clone(),
                hits,
                loading: stale,
                error: None,
                from_cache: true,
                stale,
            },
            None => SearchView {
                options: options.clone(),
                hits: Vec::new(),
                loading: true,
                error: None,
                from_cache: false,
                stale: false,
            },
        };
        let needs_fetch = view.loading;
        self.state.search = Some(view);
        if needs_fetch {
            self.spawn_search_fetch(options);
        }
        self.emit_state();
    }

    pub(super) fn clear_search(&mut self) {
        self.cancel_search_fetch();
        if self.state.search.take().is_some() {
            self.emit_state();
        }
    }

    pub(super) fn cancel_search_fetch(&mut self) {
        if let Some(handle) = self.search_task.take() {
            handle.abort();
        }
        self.search_token = self.search_token.wrapping_add(1);
    }

    fn spawn_search_fetch(&mut self, options: SearchOptions) {
        self.search_token = self.search_token.wrapping_add(1);
        let token = self.search_token;
        let session = self.session;
        let fetch = self.server.search_messages(options.clone());
        let tx = self.core_sender.clone();
        let handle = self.runtime.spawn(async move {
            let result = fetch.await;
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SearchFetched {
                token,
                session,
                options,
                result,
            })));
        });
        self.search_task = Some(handle.abort_handle());
    }

    pub(super) fn handle_search_fetched(
        &mut self,
        token: u64,
        session: u64,
        options: SearchOptions,
        result: Result<Vec<SearchHit>, FetchError>,
    ) {
        if token != self.search_token || session != self.session {
            tracing::debug!("outdated search result ignored");
            return;
        }
        self.search_task = None;
        let key = options.normalized_key();
        match result {
            Ok(hits) => {
                self.search_cache.store(options, hits.clone());
                if let Some(view) = self.state.search.as_mut() {
                    if view.options.normalized_key() == key {
                        view.hits = hits;
                        view.loading = false;
                        view.error = None;
                        view.from_cache = false;
                        view.stale = false;
                    }
                }
            }
            Err(e) => {
                tracing::warn!(err = %e, "search failed");
                if let Some(view) = self.state.search.as_mut() {
                    if view.options.normalized_key() == key {
                        view.loading = false;
                        view.error = Some(e.to_string());
                    }
                }
            }
        }
        self.emit_state();
    }

    /// Mirrors the cache's stale flag onto the visible results. Returns true
    /// when the view changed.
    pub(super) fn refresh_search_staleness(&mut self) -> bool {
        let Some(view) = self.state.search.as_mut() else {
            return false;
        };
        if view.loading || view.stale {
            return false;
        }
        let stale = self
            .search_cache
            .get(&view.options)
            .is_some_and(|lookup| lookup.stale);
        if stale {
            view.stale = true;
        }
        stale
    }
}
