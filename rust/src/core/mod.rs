mod config;
mod conversations;
mod listing;
mod media;
mod modifiers;
mod reconcile;
mod search;
mod timeline;

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use flume::Sender;
use tokio::task::AbortHandle;

use crate::caches::{MediaCache, SearchCache};
use crate::dedup::ModifierDedupWindow;
use crate::emitter::EventEmitter;
use crate::identity::resolve_raw_index;
use crate::local_cache::LocalMessageCache;
use crate::model::{ConversationItem, ItemHeader, LocalId, MessageItem, MessageStatus};
use crate::notify::Notifier;
use crate::server::ServerApi;
use crate::state::{now_millis, AppState, TimelineView};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};
use crate::AppAction;

pub use config::{load_app_config, AppConfig};
use conversations::ConversationList;
use timeline::Timelines;

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    data_dir: String,
    config: AppConfig,
    runtime: tokio::runtime::Runtime,

    server: Arc<dyn ServerApi>,
    notifier: Arc<dyn Notifier>,
    media_stale: Arc<EventEmitter<String>>,

    conversations: ConversationList,
    timelines: Timelines,
    // Items of conversations that only exist locally.
    local_cache: LocalMessageCache,
    dedup: ModifierDedupWindow,
    // chat guid -> items waiting for that conversation's metadata
    pending: HashMap<String, Vec<ConversationItem>>,
    info_tasks: Vec<AbortHandle>,
    next_local_item_id: u64,

    // Session-scoped caches; `session` bumps whenever they are rebuilt.
    session: u64,
    media_cache: MediaCache,
    search_cache: SearchCache,

    list_token: u64,
    list_task: Option<AbortHandle>,
    scan_token: u64,
    scan_task: Option<AbortHandle>,
    media_token: u64,
    media_task: Option<AbortHandle>,
    search_token: u64,
    search_task: Option<AbortHandle>,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
        server: Arc<dyn ServerApi>,
        notifier: Arc<dyn Notifier>,
        media_stale: Arc<EventEmitter<String>>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let mut state = AppState::empty();
        state.interactive = config.interactive();

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let scope_key = config.session_scope_key();
        let media_cache = MediaCache::create(
            scope_key.clone(),
            config.media_cache_settings(),
            config.media_stale_debounce(),
        );
        let search_cache = SearchCache::create(scope_key, config.search_cache_settings());
        let dedup = ModifierDedupWindow::new(config.tapback_dedup_capacity());

        let this = Self {
            state,
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            data_dir,
            config,
            runtime,
            server,
            notifier,
            media_stale,
            conversations: ConversationList::new(),
            timelines: Timelines::new(),
            local_cache: LocalMessageCache::new(),
            dedup,
            pending: HashMap::new(),
            info_tasks: Vec::new(),
            next_local_item_id: 0,
            session: 0,
            media_cache,
            search_cache,
            list_token: 0,
            list_task: None,
            scan_token: 0,
            scan_task: None,
            media_token: 0,
            media_task: None,
            search_token: 0,
            search_task: None,
        };

        // Ensure SyncApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn sync_views(&mut self) {
        self.state.conversations = self.conversations.snapshot();
        self.state.timeline = self.state.active_conversation.map(|local_id| TimelineView {
            local_id,
            items: self.timeline_items(local_id).to_vec(),
        });
    }

    fn emit_state(&mut self) {
        self.sync_views();
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn timeline_items(&self, local_id: LocalId) -> &[ConversationItem] {
        match self.conversations.get(local_id) {
            Some(c) if c.is_linked() => self.timelines.get(local_id),
            Some(_) => self.local_cache.get(local_id),
            None => &[],
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(action) => {
                // Never log `?action` directly: it carries message text.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action);
            }
            CoreMsg::Internal(internal) => {
                tracing::trace!(event = internal.tag(), "internal");
                self.handle_internal(*internal);
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::MessagesReceived { items } => self.apply_update_messages(items),
            InternalEvent::ModifiersReceived { modifiers } => self.apply_modifiers(modifiers),
            InternalEvent::ConversationInfoFetched { session, results } => {
                self.handle_conversation_info_fetched(session, results)
            }
            InternalEvent::FocusResolved { dispatch, focused } => {
                self.handle_focus_resolved(dispatch, focused)
            }
            InternalEvent::ConversationsLoaded {
                token,
                requested,
                result,
            } => self.handle_conversations_loaded(token, requested, result),
            InternalEvent::ScanCompleted { token, result } => {
                self.handle_scan_completed(token, result)
            }
            InternalEvent::MediaStaleFlush { session } => self.handle_media_stale_flush(session),
            InternalEvent::MediaFetched {
                token,
                session,
                chat_guid,
                result,
            } => self.handle_media_fetched(token, session, chat_guid, result),
            InternalEvent::SearchFetched {
                token,
                session,
                options,
                result,
            } => self.handle_search_fetched(token, session, options, result),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            // Conversation list
            AppAction::LoadConversations => self.load_conversations(),
            AppAction::LoadMoreConversations => self.load_more_conversations(),
            AppAction::AddConversation {
                service,
                members,
                name,
            } => self.add_conversation(service, members, name),
            AppAction::MarkConversationRead { local_id } => {
                if self
                    .conversations
                    .update(local_id, |c| c.unread_messages = false)
                {
                    self.emit_state();
                }
            }
            AppAction::OpenConversation { conversation_id } => {
                self.open_conversation(&conversation_id)
            }
            AppAction::CloseConversation => {
                if self.state.active_conversation.take().is_some() {
                    self.emit_state();
                }
            }

            // Compose
            AppAction::SendMessage { local_id, text } => self.send_message(local_id, text),

            // Attachment drawer
            AppAction::LoadConversationMedia { chat_guid } => {
                self.load_conversation_media(chat_guid)
            }
            AppAction::CloseMedia => self.close_media(),

            // Search
            AppAction::Search { options } => self.search(options),
            AppAction::ClearSearch => self.clear_search(),
            AppAction::ScanConversations { query } => self.scan_conversations(query),

            // Lifecycle
            AppAction::SetInteractive { interactive } => {
                if self.state.interactive != interactive {
                    self.state.interactive = interactive;
                    self.emit_state();
                }
            }
            AppAction::SessionChanged { scope_key } => self.session_changed(scope_key),
        }
    }

    fn add_conversation(&mut self, service: String, members: Vec<String>, name: Option<String>) {
        // Composing to an existing chat opens it instead of creating a twin.
        let existing = self
            .conversations
            .iter()
            .find(|c| c.same_participants(&service, &members))
            .map(|c| c.local_id);
        let local_id = match existing {
            Some(local_id) => local_id,
            None => {
                let local_id = self.conversations.insert_local(service, members, name);
                tracing::info!(%local_id, "local conversation created");
                local_id
            }
        };
        self.state.active_conversation = Some(local_id);
        self.emit_state();
    }

    fn open_conversation(&mut self, raw: &str) {
        let snapshot = self.conversations.snapshot();
        let Some(index) = resolve_raw_index(&snapshot, raw) else {
            tracing::debug!(conversation_id = %raw, "open: unknown conversation");
            return;
        };
        let local_id = snapshot[index].local_id;
        self.state.active_conversation = Some(local_id);
        self.conversations
            .update(local_id, |c| c.unread_messages = false);
        self.emit_state();
    }

    /// Local compose. The item is tagged with the conversation's current
    /// identity and goes through the same pipeline as server items.
    fn send_message(&mut self, local_id: LocalId, text: String) {
        let Some(conversation) = self.conversations.get(local_id).cloned() else {
            tracing::warn!(%local_id, "send: unknown conversation");
            return;
        };
        if text.trim().is_empty() {
            return;
        }
        self.next_local_item_id += 1;
        let header = ItemHeader {
            date: now_millis(),
            guid: None,
            local_id: Some(self.next_local_item_id),
            chat_guid: conversation.guid.clone(),
            chat_local_id: if conversation.is_linked() {
                None
            } else {
                Some(local_id)
            },
        };
        let item = ConversationItem::Message(MessageItem {
            header,
            text: Some(text),
            sender: None,
            status: MessageStatus::Unconfirmed,
            ..Default::default()
        });
        self.apply_update_messages(vec![item]);
    }

    fn session_changed(&mut self, scope_key: String) {
        tracing::info!(scope = %scope_key, data_dir = %self.data_dir, "session changed; rebuilding caches");
        self.session = self.session.wrapping_add(1);
        for handle in self.info_tasks.drain(..) {
            handle.abort();
        }
        self.pending.clear();
        self.cancel_media_fetch();
        self.cancel_search_fetch();

        let media = std::mem::replace(
            &mut self.media_cache,
            MediaCache::create(
                scope_key.clone(),
                self.config.media_cache_settings(),
                self.config.media_stale_debounce(),
            ),
        );
        media.dispose();
        let search = std::mem::replace(
            &mut self.search_cache,
            SearchCache::create(scope_key, self.config.search_cache_settings()),
        );
        search.dispose();

        self.state.media = None;
        self.state.search = None;
        self.emit_state();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use crate::model::{
        Attachment, ChatRenameAction, ConversationPreview, MessageModifier, MessagePreview,
        ParticipantAction, ParticipantActionType, RemoteConversation, ScanTotals, SearchHit,
        SearchOptions, TapbackItem, TapbackType,
    };
    use crate::notify::{MessageNotification, SoundCue};
    use crate::server::InfoResults;
    use flume::Receiver;
    use futures::future::{self, BoxFuture};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct FakeServer {
        info: Mutex<HashMap<String, RemoteConversation>>,
        info_calls: Mutex<Vec<Vec<String>>>,
        listing: Mutex<Vec<RemoteConversation>>,
        attachments: Mutex<HashMap<String, Vec<Attachment>>>,
        attachment_calls: AtomicUsize,
        fail_attachments: AtomicBool,
        hits: Mutex<Vec<SearchHit>>,
        search_calls: AtomicUsize,
    }

    impl ServerApi for FakeServer {
        fn fetch_conversation_info(&self, guids: Vec<String>) -> BoxFuture<'static, InfoResults> {
            self.info_calls.lock().unwrap().push(guids.clone());
            let table = self.info.lock().unwrap();
            let results: InfoResults = guids
                .into_iter()
                .map(|guid| {
                    let result = table
                        .get(&guid)
                        .cloned()
                        .ok_or_else(|| FetchError::NotFound(guid.clone()));
                    (guid, result)
                })
                .collect();
            Box::pin(future::ready(results))
        }

        fn fetch_conversations(
            &self,
            count: usize,
        ) -> BoxFuture<'static, Result<Vec<RemoteConversation>, FetchError>> {
            let list: Vec<_> = self.listing.lock().unwrap().iter().take(count).cloned().collect();
            Box::pin(future::ready(Ok(list)))
        }

        fn fetch_conversation_scan_totals(
            &self,
        ) -> BoxFuture<'static, Result<ScanTotals, FetchError>> {
            let conversations = self.listing.lock().unwrap().len();
            Box::pin(future::ready(Ok(ScanTotals {
                conversations,
                messages: 0,
            })))
        }

        fn fetch_conversation_scan_page(
            &self,
            offset: usize,
            limit: usize,
        ) -> BoxFuture<'static, Result<Vec<RemoteConversation>, FetchError>> {
            let page: Vec<_> = self
                .listing
                .lock()
                .unwrap()
                .iter()
                .skip(offset)
                .take(limit)
                .cloned()
                .collect();
            Box::pin(future::ready(Ok(page)))
        }

        fn fetch_chat_attachments(
            &self,
            chat_guid: String,
        ) -> BoxFuture<'static, Result<Vec<Attachment>, FetchError>> {
            self.attachment_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_attachments.load(Ordering::SeqCst) {
                return Box::pin(future::ready(Err(FetchError::Status(500))));
            }
            let list = self
                .attachments
                .lock()
                .unwrap()
                .get(&chat_guid)
                .cloned()
                .unwrap_or_default();
            Box::pin(future::ready(Ok(list)))
        }

        fn search_messages(
            &self,
            options: SearchOptions,
        ) -> BoxFuture<'static, Result<Vec<SearchHit>, FetchError>> {
            self.search_calls.fetch_add(1, Ordering::SeqCst);
            let scope = options.scope();
            let hits: Vec<_> = self
                .hits
                .lock()
                .unwrap()
                .iter()
                .filter(|h| scope.as_ref().map_or(true, |s| s.contains(&h.chat_guid)))
                .cloned()
                .collect();
            Box::pin(future::ready(Ok(hits)))
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        focused: AtomicBool,
        notifications: Mutex<Vec<MessageNotification>>,
        sounds: Mutex<Vec<SoundCue>>,
    }

    impl RecordingNotifier {
        fn notifications(&self) -> Vec<MessageNotification> {
            self.notifications.lock().unwrap().clone()
        }

        fn sounds(&self) -> Vec<SoundCue> {
            self.sounds.lock().unwrap().clone()
        }
    }

    impl Notifier for RecordingNotifier {
        fn has_focus(&self) -> BoxFuture<'static, bool> {
            Box::pin(future::ready(self.focused.load(Ordering::SeqCst)))
        }

        fn notify_messages(&self, notification: MessageNotification) {
            self.notifications.lock().unwrap().push(notification);
        }

        fn play_sound(&self, cue: SoundCue) {
            self.sounds.lock().unwrap().push(cue);
        }
    }

    struct Harness {
        core: AppCore,
        rx: Receiver<CoreMsg>,
        server: Arc<FakeServer>,
        notifier: Arc<RecordingNotifier>,
        stale: Arc<Mutex<Vec<String>>>,
        _dir: tempfile::TempDir,
    }

    impl Harness {
        /// Runs queued internal events until the queue stays quiet.
        fn drain(&mut self) {
            while let Ok(msg) = self.rx.recv_timeout(Duration::from_millis(200)) {
                self.core.handle_message(msg);
            }
        }

        fn push(&mut self, items: Vec<ConversationItem>) {
            self.core.handle_message(CoreMsg::Internal(Box::new(
                InternalEvent::MessagesReceived { items },
            )));
        }

        fn push_modifiers(&mut self, modifiers: Vec<MessageModifier>) {
            self.core.handle_message(CoreMsg::Internal(Box::new(
                InternalEvent::ModifiersReceived { modifiers },
            )));
        }

        fn act(&mut self, action: AppAction) {
            self.core.handle_message(CoreMsg::Action(action));
        }

        fn seed(&mut self, remote: RemoteConversation) -> LocalId {
            let id = self.core.conversations.insert_remote(remote);
            self.core.emit_state();
            id
        }

        fn conversation(&self, id: LocalId) -> Arc<crate::model::Conversation> {
            self.core.conversations.get(id).cloned().expect("conversation")
        }

        fn dates(&self) -> Vec<Option<i64>> {
            self.core
                .state
                .conversations
                .iter()
                .map(|c| c.preview_date())
                .collect()
        }
    }

    fn make_core() -> Harness {
        let dir = tempfile::tempdir().expect("tempdir");
        let data_dir = dir.path().to_string_lossy().into_owned();
        std::fs::write(
            dir.path().join(config::CONFIG_FILE_NAME),
            r#"{ "media_stale_debounce_ms": 10, "conversation_page_size": 2 }"#,
        )
        .expect("write config");

        let (update_tx, _update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded();
        let server = Arc::new(FakeServer::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let media_stale = Arc::new(EventEmitter::<String>::new());
        let stale = Arc::new(Mutex::new(Vec::new()));
        let sink = stale.clone();
        media_stale.subscribe(move |guid: &String| sink.lock().unwrap().push(guid.clone()));

        let core = AppCore::new(
            update_tx,
            core_tx,
            data_dir,
            Arc::new(RwLock::new(AppState::empty())),
            server.clone(),
            notifier.clone(),
            media_stale,
        );
        Harness {
            core,
            rx: core_rx,
            server,
            notifier,
            stale,
            _dir: dir,
        }
    }

    fn message(guid: &str, chat: &str, date: i64, sender: Option<&str>, text: &str) -> ConversationItem {
        ConversationItem::Message(MessageItem {
            header: ItemHeader {
                date,
                guid: Some(guid.into()),
                chat_guid: Some(chat.into()),
                ..Default::default()
            },
            text: Some(text.into()),
            sender: sender.map(str::to_string),
            status: MessageStatus::Delivered,
            ..Default::default()
        })
    }

    fn incoming(guid: &str, chat: &str, date: i64, text: &str) -> ConversationItem {
        message(guid, chat, date, Some("x"), text)
    }

    fn with_image(item: ConversationItem) -> ConversationItem {
        match item {
            ConversationItem::Message(mut m) => {
                m.attachments.push(Attachment {
                    guid: format!("att-{}", m.header.guid.clone().unwrap_or_default()),
                    mime_type: Some("image/jpeg".into()),
                    ..Default::default()
                });
                ConversationItem::Message(m)
            }
            other => other,
        }
    }

    fn remote(guid: &str, members: &[&str], preview_date: Option<i64>) -> RemoteConversation {
        RemoteConversation {
            guid: guid.into(),
            service: "iMessage".into(),
            members: members.iter().map(|m| m.to_string()).collect(),
            name: None,
            preview: preview_date
                .map(|date| {
                    ConversationPreview::Message(MessagePreview {
                        date,
                        text: Some("earlier".into()),
                        send_style: None,
                        attachments: vec![],
                    })
                })
                .unwrap_or_default(),
            unread_messages: false,
        }
    }

    fn tapback(is_addition: bool) -> MessageModifier {
        MessageModifier::Tapback(TapbackItem {
            message_guid: "m1".into(),
            message_index: 0,
            sender: Some("x".into()),
            tapback_type: TapbackType::Love,
            is_addition,
        })
    }

    fn assert_descending(dates: &[Option<i64>]) {
        for pair in dates.windows(2) {
            assert!(pair[0] >= pair[1], "list out of order: {dates:?}");
        }
    }

    #[test]
    fn unknown_conversation_is_fetched_linked_and_replayed() {
        let mut h = make_core();
        h.server.info.lock().unwrap().insert(
            "c1".into(),
            RemoteConversation {
                preview: ConversationPreview::Message(MessagePreview {
                    date: 1_000,
                    text: Some("hi".into()),
                    send_style: None,
                    attachments: vec![],
                }),
                ..remote("c1", &["x"], None)
            },
        );

        h.push(vec![incoming("m1", "c1", 1_000, "hi")]);
        let buffered = h.core.pending.get("c1").expect("buffered under c1");
        assert_eq!(buffered.len(), 1);
        assert_eq!(buffered[0].header().guid.as_deref(), Some("m1"));
        assert!(h.core.state.conversations.is_empty());

        h.drain();
        assert!(h.core.pending.is_empty());
        assert_eq!(h.core.state.conversations.len(), 1);
        let conversation = h.core.state.conversations[0].clone();
        assert_eq!(conversation.guid.as_deref(), Some("c1"));
        assert!(conversation.unread_messages);
        assert_eq!(conversation.preview.snippet(), "hi");
        assert_eq!(h.core.timelines.get(conversation.local_id).len(), 1);
        assert_eq!(*h.server.info_calls.lock().unwrap(), vec![vec!["c1".to_string()]]);
        assert_eq!(h.notifier.notifications().len(), 1);
    }

    #[test]
    fn replayed_batch_is_idempotent() {
        let mut h = make_core();
        let id = h.seed(remote("c1", &["x"], Some(100)));
        let batch = vec![incoming("m2", "c1", 200, "new")];

        h.push(batch.clone());
        h.drain();
        assert!(h.conversation(id).unread_messages);
        assert_eq!(h.notifier.notifications().len(), 1);

        h.act(AppAction::MarkConversationRead { local_id: id });
        assert!(!h.conversation(id).unread_messages);
        let generation = h.core.conversations.generation();
        let snapshot = h.core.state.conversations.clone();

        h.push(batch);
        h.drain();
        assert!(!h.conversation(id).unread_messages);
        assert_eq!(h.notifier.notifications().len(), 1);
        // Structurally identical preview: nothing was replaced or re-sorted.
        assert_eq!(h.core.conversations.generation(), generation);
        assert!(Arc::ptr_eq(&snapshot, &h.core.state.conversations));
        assert_eq!(h.core.timelines.get(id).len(), 1);
    }

    #[test]
    fn list_stays_sorted_by_preview_date() {
        let mut h = make_core();
        h.seed(remote("a", &["1"], Some(10)));
        h.seed(remote("b", &["2"], Some(20)));
        h.seed(remote("c", &["3"], Some(30)));
        assert_descending(&h.dates());

        h.push(vec![incoming("m1", "a", 40, "bump a")]);
        assert_descending(&h.dates());
        assert_eq!(h.core.state.conversations[0].guid.as_deref(), Some("a"));

        // Older than the current preview: no reorder.
        h.push(vec![incoming("m2", "b", 5, "old")]);
        assert_descending(&h.dates());
        assert_eq!(h.dates(), vec![Some(40), Some(30), Some(20)]);

        h.push(vec![
            incoming("m3", "c", 50, "c1"),
            incoming("m4", "b", 60, "b1"),
            incoming("m5", "c", 45, "c0"),
        ]);
        assert_descending(&h.dates());
        assert_eq!(h.dates(), vec![Some(60), Some(50), Some(40)]);
    }

    #[test]
    fn active_conversation_never_goes_unread() {
        let mut h = make_core();
        let id = h.seed(remote("c1", &["x"], Some(100)));
        h.act(AppAction::OpenConversation {
            conversation_id: id.to_string(),
        });
        assert_eq!(h.core.state.active_conversation, Some(id));

        h.notifier.focused.store(true, Ordering::SeqCst);
        h.push(vec![incoming("m1", "c1", 200, "while focused")]);
        h.drain();
        assert!(!h.conversation(id).unread_messages);
        assert!(h.notifier.notifications().is_empty());
        assert!(matches!(
            h.notifier.sounds().as_slice(),
            [SoundCue::MessageArrived { .. }]
        ));

        h.notifier.focused.store(false, Ordering::SeqCst);
        h.push(vec![incoming("m2", "c1", 300, "while away")]);
        h.drain();
        assert!(!h.conversation(id).unread_messages);
        assert_eq!(h.notifier.notifications().len(), 1);
        assert_eq!(h.notifier.sounds().len(), 1);
        let timeline = h.core.state.timeline.clone().expect("timeline");
        assert_eq!(timeline.items.len(), 2);
    }

    #[test]
    fn focused_window_notifies_other_conversations_only() {
        let mut h = make_core();
        let open = h.seed(remote("iMessage;-;open", &["x"], Some(100)));
        let other = h.seed(remote("iMessage;-;other", &["y"], Some(100)));
        h.act(AppAction::OpenConversation {
            conversation_id: "iMessage;-;open".into(),
        });
        h.notifier.focused.store(true, Ordering::SeqCst);

        h.push(vec![
            incoming("m1", "iMessage;-;open", 200, "here"),
            incoming("m2", "iMessage;-;other", 200, "there"),
        ]);
        h.drain();

        let notifications = h.notifier.notifications();
        assert_eq!(notifications.len(), 1);
        assert_eq!(notifications[0].conversation.local_id, other);
        assert!(h.notifier.sounds().is_empty());
        assert!(!h.conversation(open).unread_messages);
        assert!(h.conversation(other).unread_messages);
    }

    #[test]
    fn outgoing_and_background_messages_do_not_notify() {
        let mut h = make_core();
        let id = h.seed(remote("c1", &["x"], Some(100)));
        h.push(vec![message("m1", "c1", 200, None, "from me")]);
        h.drain();
        assert!(!h.conversation(id).unread_messages);
        assert_eq!(h.conversation(id).preview.snippet(), "from me");

        h.act(AppAction::SetInteractive { interactive: false });
        h.push(vec![incoming("m2", "c1", 300, "quiet")]);
        h.drain();
        assert!(h.conversation(id).unread_messages);
        assert!(h.notifier.notifications().is_empty());
        assert!(h.notifier.sounds().is_empty());
    }

    #[test]
    fn relink_keeps_local_id_and_drops_local_cache() {
        let mut h = make_core();
        h.act(AppAction::AddConversation {
            service: "iMessage".into(),
            members: vec!["B@x.com".into(), "+1 555 000 1111".into()],
            name: None,
        });
        let local = h.core.state.active_conversation.expect("new conversation is active");
        h.act(AppAction::SendMessage {
            local_id: local,
            text: "drafted offline".into(),
        });
        assert!(h.core.local_cache.contains(local));
        assert_eq!(h.core.state.timeline.as_ref().map(|t| t.items.len()), Some(1));

        h.server.info.lock().unwrap().insert(
            "iMessage;+;chat9".into(),
            remote("iMessage;+;chat9", &["+15550001111", "b@x.com"], None),
        );
        h.push(vec![incoming("m1", "iMessage;+;chat9", now_millis() + 1_000, "hello")]);
        h.drain();

        assert_eq!(h.core.state.conversations.len(), 1);
        let linked = h.conversation(local);
        assert_eq!(linked.local_id, local);
        assert_eq!(linked.guid.as_deref(), Some("iMessage;+;chat9"));
        assert!(!h.core.local_cache.contains(local));
        assert_eq!(h.core.timelines.get(local).len(), 1);
        // Open conversation: no unread flag even though the message is new.
        assert!(!linked.unread_messages);
    }

    #[test]
    fn tapbacks_apply_once_and_sound_once() {
        let mut h = make_core();
        let id = h.seed(remote("c1", &["x"], Some(100)));
        h.push(vec![incoming("m1", "c1", 200, "react to me")]);
        h.drain();

        h.push_modifiers(vec![tapback(true), tapback(true)]);
        let tapbacks = |h: &Harness| {
            h.core.timelines.get(id)[0]
                .as_message()
                .map(|m| m.tapbacks.len())
                .unwrap_or_default()
        };
        assert_eq!(tapbacks(&h), 1);
        match h.notifier.sounds().as_slice() {
            [SoundCue::TapbackArrived { tapbacks }] => assert_eq!(tapbacks.len(), 1),
            other => panic!("unexpected sounds: {other:?}"),
        }

        h.push_modifiers(vec![tapback(false)]);
        assert_eq!(tapbacks(&h), 0);
        // Removals never play a sound; redelivered additions are ignored.
        h.push_modifiers(vec![tapback(true)]);
        assert_eq!(tapbacks(&h), 0);
        assert_eq!(h.notifier.sounds().len(), 1);
    }

    #[test]
    fn metadata_failure_drops_buffered_items() {
        let mut h = make_core();
        h.push(vec![incoming("m1", "iMessage;-;ghost", 10, "lost")]);
        h.drain();
        assert!(h.core.state.conversations.is_empty());
        assert!(h.core.pending.is_empty());

        // No retry on its own, but a later batch asks again.
        h.push(vec![incoming("m2", "iMessage;-;ghost", 20, "again")]);
        h.drain();
        assert_eq!(h.server.info_calls.lock().unwrap().len(), 2);
    }

    #[test]
    fn in_flight_fetch_absorbs_later_batches() {
        let mut h = make_core();
        h.server
            .info
            .lock()
            .unwrap()
            .insert("c1".into(), remote("c1", &["x"], None));

        h.push(vec![incoming("m1", "c1", 10, "one")]);
        h.push(vec![incoming("m2", "c1", 20, "two")]);
        assert_eq!(h.core.pending.get("c1").map(Vec::len), Some(2));
        h.drain();

        assert_eq!(h.server.info_calls.lock().unwrap().len(), 1);
        let id = h.core.state.conversations[0].local_id;
        assert_eq!(h.core.timelines.get(id).len(), 2);
        assert_eq!(h.conversation(id).preview.snippet(), "two");
    }

    #[test]
    fn participant_and_rename_actions() {
        let mut h = make_core();
        let id = h.seed(remote("c1", &["a@x.com"], Some(100)));
        let header = |date| ItemHeader {
            date,
            chat_guid: Some("c1".into()),
            ..Default::default()
        };
        h.push(vec![
            ConversationItem::ParticipantAction(ParticipantAction {
                header: header(110),
                kind: ParticipantActionType::Join,
                sender: Some("a@x.com".into()),
                target: Some("b@x.com".into()),
            }),
            ConversationItem::ParticipantAction(ParticipantAction {
                header: header(111),
                kind: ParticipantActionType::Leave,
                sender: Some("a@x.com".into()),
                target: None,
            }),
            ConversationItem::ParticipantAction(ParticipantAction {
                header: header(112),
                kind: ParticipantActionType::Leave,
                sender: None,
                target: Some("A@X.com".into()),
            }),
            ConversationItem::ChatRenameAction(ChatRenameAction {
                header: header(113),
                sender: Some("b@x.com".into()),
                chat_name: "Trip".into(),
            }),
        ]);

        let conversation = h.conversation(id);
        assert_eq!(conversation.members, vec!["b@x.com".to_string()]);
        assert_eq!(conversation.name.as_deref(), Some("Trip"));
        // Actions are not messages: preview untouched.
        assert_eq!(conversation.preview_date(), Some(100));
    }

    #[test]
    fn unknown_local_reference_is_ignored() {
        let mut h = make_core();
        let id = h.seed(remote("c1", &["x"], Some(100)));
        let orphan = ConversationItem::Message(MessageItem {
            header: ItemHeader {
                date: 500,
                local_id: Some(1),
                chat_local_id: Some(LocalId(999)),
                ..Default::default()
            },
            text: Some("nowhere".into()),
            ..Default::default()
        });
        h.push(vec![orphan, incoming("m1", "c1", 200, "still applied")]);
        assert_eq!(h.conversation(id).preview.snippet(), "still applied");
        assert!(h.core.pending.is_empty());
    }

    #[test]
    fn media_goes_stale_once_and_visible_view_refetches() {
        let mut h = make_core();
        h.seed(remote("c1", &["x"], Some(100)));
        h.server.attachments.lock().unwrap().insert(
            "c1".into(),
            vec![Attachment {
                guid: "a0".into(),
                mime_type: Some("image/png".into()),
                ..Default::default()
            }],
        );
        h.act(AppAction::LoadConversationMedia {
            chat_guid: "c1".into(),
        });
        h.drain();
        let view = h.core.state.media.clone().expect("media view");
        assert_eq!(view.attachments.len(), 1);
        assert!(!view.from_cache && !view.loading);

        h.push(vec![with_image(incoming("m1", "c1", 200, "pic"))]);
        h.push(vec![with_image(incoming("m2", "c1", 201, "another"))]);
        h.drain();

        assert_eq!(*h.stale.lock().unwrap(), vec!["c1".to_string()]);
        assert_eq!(h.server.attachment_calls.load(Ordering::SeqCst), 2);
        let view = h.core.state.media.clone().expect("media view");
        assert!(!view.stale && !view.loading);
    }

    #[test]
    fn images_for_unknown_chats_never_go_stale() {
        let mut h = make_core();
        h.push(vec![with_image(incoming("m1", "iMessage;-;ghost", 200, "pic"))]);
        h.drain();
        assert!(h.core.state.conversations.is_empty());
        assert!(h.stale.lock().unwrap().is_empty());
    }

    #[test]
    fn buffered_image_goes_stale_once_after_fetch() {
        let mut h = make_core();
        h.server
            .info
            .lock()
            .unwrap()
            .insert("c1".into(), remote("c1", &["x"], None));
        h.push(vec![with_image(incoming("m1", "c1", 200, "pic"))]);
        h.drain();
        assert_eq!(h.core.state.conversations.len(), 1);
        assert_eq!(*h.stale.lock().unwrap(), vec!["c1".to_string()]);
    }

    #[test]
    fn media_error_keeps_cached_attachments() {
        let mut h = make_core();
        h.seed(remote("c1", &["x"], Some(100)));
        h.server.attachments.lock().unwrap().insert(
            "c1".into(),
            vec![Attachment {
                guid: "a0".into(),
                mime_type: Some("image/png".into()),
                ..Default::default()
            }],
        );
        h.act(AppAction::LoadConversationMedia {
            chat_guid: "c1".into(),
        });
        h.drain();
        h.act(AppAction::CloseMedia);

        h.server.fail_attachments.store(true, Ordering::SeqCst);
        h.push(vec![with_image(incoming("m1", "c1", 200, "pic"))]);
        h.drain();
        // Not visible: marked stale but not refetched.
        assert_eq!(h.server.attachment_calls.load(Ordering::SeqCst), 1);

        h.act(AppAction::LoadConversationMedia {
            chat_guid: "c1".into(),
        });
        h.drain();
        let view = h.core.state.media.clone().expect("media view");
        assert_eq!(view.attachments.len(), 1);
        assert!(view.from_cache);
        assert!(view.stale);
        assert!(!view.loading);
        assert!(view.error.is_some());
    }

    #[test]
    fn search_results_go_stale_by_scope_and_on_modifiers() {
        let mut h = make_core();
        h.seed(remote("c1", &["x"], Some(100)));
        h.seed(remote("c2", &["y"], Some(100)));
        h.server.hits.lock().unwrap().push(SearchHit {
            message_guid: "m0".into(),
            chat_guid: "c1".into(),
            date: 50,
            sender: Some("x".into()),
            text: Some("dinner?".into()),
        });
        let options = SearchOptions {
            query: "dinner".into(),
            chat_guids: Some(vec!["c1".into()]),
            limit: None,
        };
        h.act(AppAction::Search {
            options: options.clone(),
        });
        h.drain();
        assert_eq!(h.core.state.search.as_ref().map(|s| s.hits.len()), Some(1));

        h.push(vec![incoming("m1", "c2", 200, "elsewhere")]);
        assert!(!h.core.state.search.as_ref().is_some_and(|s| s.stale));
        h.push(vec![incoming("m2", "c1", 200, "dinner at 8")]);
        assert!(h.core.state.search.as_ref().is_some_and(|s| s.stale));
        h.drain();

        // Same search again: stale cache entry is refetched.
        h.act(AppAction::Search {
            options: options.clone(),
        });
        h.drain();
        assert_eq!(h.server.search_calls.load(Ordering::SeqCst), 2);
        assert!(!h.core.state.search.as_ref().is_some_and(|s| s.stale));

        h.push_modifiers(vec![tapback(true)]);
        assert!(h.core.state.search.as_ref().is_some_and(|s| s.stale));
    }

    #[test]
    fn session_change_rebuilds_caches_and_ignores_old_fetches() {
        let mut h = make_core();
        h.seed(remote("c1", &["x"], Some(100)));
        h.act(AppAction::LoadConversationMedia {
            chat_guid: "c1".into(),
        });
        h.drain();
        assert!(h.core.media_cache.get("c1").is_some());

        h.server
            .info
            .lock()
            .unwrap()
            .insert("c9".into(), remote("c9", &["z"], None));
        h.push(vec![incoming("m9", "c9", 10, "late")]);
        h.act(AppAction::SessionChanged {
            scope_key: "account-2".into(),
        });
        h.drain();

        assert_eq!(h.core.media_cache.scope_key(), "account-2");
        assert_eq!(h.core.search_cache.scope_key(), "account-2");
        assert!(h.core.media_cache.get("c1").is_none());
        assert!(h.core.state.media.is_none());
        assert!(h.core.state.conversation_by_guid("c9").is_none());
        assert!(h.core.pending.is_empty());
    }

    #[test]
    fn listing_pages_and_merges() {
        let mut h = make_core();
        *h.server.listing.lock().unwrap() = vec![
            remote("iMessage;-;a", &["a"], Some(30)),
            remote("iMessage;-;b", &["b"], Some(20)),
            remote("iMessage;-;c", &["c"], Some(10)),
        ];
        h.act(AppAction::LoadConversations);
        h.drain();
        assert_eq!(h.core.state.conversations.len(), 2);
        assert_eq!(h.core.state.visible_conversations().len(), 2);
        assert!(h.core.state.has_more_conversations);

        h.act(AppAction::LoadMoreConversations);
        h.drain();
        assert_eq!(h.core.state.conversations.len(), 3);
        assert!(!h.core.state.has_more_conversations);
        assert!(!h.core.state.loading_conversations);
        assert_descending(&h.dates());

        // Reloading does not duplicate linked conversations.
        h.act(AppAction::LoadConversations);
        h.drain();
        assert_eq!(h.core.state.conversations.len(), 3);
    }

    #[test]
    fn scan_pages_through_every_conversation() {
        let mut h = make_core();
        let mut club = remote("iMessage;+;chat1", &["a", "b"], Some(5));
        club.name = Some("Book Club".into());
        *h.server.listing.lock().unwrap() = vec![
            remote("iMessage;-;a", &["a"], Some(30)),
            club,
            remote("iMessage;-;c", &["c"], Some(10)),
        ];
        h.act(AppAction::ScanConversations {
            query: "book".into(),
        });
        h.drain();
        let scan = h.core.state.scan.clone().expect("scan view");
        assert!(!scan.loading);
        assert_eq!(scan.scanned, 3);
        assert_eq!(scan.totals.map(|t| t.conversations), Some(3));
        assert_eq!(scan.matches.len(), 1);
        assert_eq!(scan.matches[0].guid, "iMessage;+;chat1");
    }

    #[test]
    fn evicted_tapback_redelivery_is_reapplied() {
        let mut h = make_core();
        h.core.dedup = ModifierDedupWindow::new(2);
        let id = h.seed(remote("c1", &["x"], Some(100)));
        h.push(vec![incoming("m1", "c1", 200, "react")]);
        h.drain();

        let like = |sender: &str| {
            MessageModifier::Tapback(TapbackItem {
                message_guid: "m1".into(),
                message_index: 0,
                sender: Some(sender.into()),
                tapback_type: TapbackType::Like,
                is_addition: true,
            })
        };
        h.push_modifiers(vec![like("a"), like("b"), like("c")]);
        // "a" was evicted, so its redelivery is applied again (known gap).
        h.push_modifiers(vec![like("a")]);
        assert_eq!(h.notifier.sounds().len(), 2);
        let count = h.core.timelines.get(id)[0]
            .as_message()
            .map(|m| m.tapbacks.len());
        assert_eq!(count, Some(3));
    }
}
