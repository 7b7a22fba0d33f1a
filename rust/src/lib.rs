mod actions;
pub mod caches;
mod core;
pub mod dedup;
pub mod emitter;
pub mod error;
pub mod fixture;
pub mod identity;
pub mod local_cache;
mod logging;
pub mod model;
pub mod notify;
pub mod server;
mod state;
mod updates;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::thread;

use flume::{Receiver, Sender};

pub use actions::AppAction;
pub use crate::core::{load_app_config, AppConfig};
pub use emitter::{EventEmitter, SubscriptionId};
pub use logging::init_logging;
pub use model::{ConversationItem, MessageModifier};
pub use state::*;
pub use updates::*;

pub trait AppReconciler: Send + Sync + 'static {
    fn reconcile(&self, update: AppUpdate);
}

/// Handle to the sync engine. Owns the actor thread; every method is
/// non-blocking.
pub struct SyncApp {
    core_tx: Sender<CoreMsg>,
    update_rx: Receiver<AppUpdate>,
    listening: AtomicBool,
    shared_state: Arc<RwLock<AppState>>,
    message_updates: Arc<EventEmitter<Vec<ConversationItem>>>,
    modifier_updates: Arc<EventEmitter<Vec<MessageModifier>>>,
    media_stale: Arc<EventEmitter<String>>,
}

impl SyncApp {
    pub fn new(
        data_dir: String,
        server: Arc<dyn server::ServerApi>,
        notifier: Arc<dyn notify::Notifier>,
    ) -> Arc<Self> {
        logging::init_logging();
        tracing::info!(data_dir = %data_dir, "SyncApp::new() starting");

        let (update_tx, update_rx) = flume::unbounded();
        let (core_tx, core_rx) = flume::unbounded::<CoreMsg>();
        let shared_state = Arc::new(RwLock::new(AppState::empty()));
        let media_stale = Arc::new(EventEmitter::new());

        // Inbound streams feed the actor queue, so batches are reconciled in
        // arrival order on the actor thread.
        let message_updates = Arc::new(EventEmitter::<Vec<ConversationItem>>::new());
        let tx = core_tx.clone();
        message_updates.subscribe(move |items: &Vec<ConversationItem>| {
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::MessagesReceived {
                items: items.clone(),
            })));
        });
        let modifier_updates = Arc::new(EventEmitter::<Vec<MessageModifier>>::new());
        let tx = core_tx.clone();
        modifier_updates.subscribe(move |modifiers: &Vec<MessageModifier>| {
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ModifiersReceived {
                modifiers: modifiers.clone(),
            })));
        });

        // Actor loop thread (single threaded "app actor").
        let core_tx_for_core = core_tx.clone();
        let shared_for_core = shared_state.clone();
        let stale_for_core = media_stale.clone();
        thread::spawn(move || {
            let mut core = crate::core::AppCore::new(
                update_tx,
                core_tx_for_core,
                data_dir,
                shared_for_core,
                server,
                notifier,
                stale_for_core,
            );
            while let Ok(msg) = core_rx.recv() {
                core.handle_message(msg);
            }
        });

        Arc::new(Self {
            core_tx,
            update_rx,
            listening: AtomicBool::new(false),
            shared_state,
            message_updates,
            modifier_updates,
            media_stale,
        })
    }

    pub fn state(&self) -> AppState {
        match self.shared_state.read() {
            Ok(g) => g.clone(),
            Err(poison) => poison.into_inner().clone(),
        }
    }

    pub fn dispatch(&self, action: AppAction) {
        // Contract: never block caller.
        let _ = self.core_tx.send(CoreMsg::Action(action));
    }

    /// Stream of inbound message batches. Anything emitted here is reconciled.
    pub fn message_updates(&self) -> Arc<EventEmitter<Vec<ConversationItem>>> {
        self.message_updates.clone()
    }

    /// Stream of inbound tapback/sticker batches.
    pub fn modifier_updates(&self) -> Arc<EventEmitter<Vec<MessageModifier>>> {
        self.modifier_updates.clone()
    }

    pub fn push_messages(&self, items: Vec<ConversationItem>) {
        self.message_updates.emit(&items);
    }

    pub fn push_modifiers(&self, modifiers: Vec<MessageModifier>) {
        self.modifier_updates.emit(&modifiers);
    }

    /// `listener` receives the chat guid of every conversation whose cached
    /// media went stale, once per debounce window.
    pub fn subscribe_to_conversation_media_cache_stale(
        &self,
        listener: impl Fn(&str) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.media_stale
            .subscribe(move |chat_guid: &String| listener(chat_guid))
    }

    pub fn unsubscribe_from_conversation_media_cache_stale(&self, id: SubscriptionId) -> bool {
        self.media_stale.unsubscribe(id)
    }

    pub fn listen_for_updates(&self, reconciler: Box<dyn AppReconciler>) {
        if self
            .listening
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            // Avoid multiple listeners that would split messages.
            return;
        }

        let rx = self.update_rx.clone();
        thread::spawn(move || {
            while let Ok(update) = rx.recv() {
                reconciler.reconcile(update);
            }
        });
    }
}
