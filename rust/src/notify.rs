//! Boundary to the presentation layer's notification and sound subsystem.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::{self, BoxFuture};

use crate::model::{Conversation, MessageItem, TapbackItem};

/// One OS-level notification batch for one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageNotification {
    pub conversation: Arc<Conversation>,
    pub messages: Vec<MessageItem>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SoundCue {
    /// New incoming message in the conversation the user is looking at.
    MessageArrived {
        conversation: Arc<Conversation>,
        messages: Vec<MessageItem>,
    },
    TapbackArrived {
        tapbacks: Vec<TapbackItem>,
    },
}

impl SoundCue {
    pub fn tag(&self) -> &'static str {
        match self {
            SoundCue::MessageArrived { .. } => "MessageArrived",
            SoundCue::TapbackArrived { .. } => "TapbackArrived",
        }
    }
}

pub trait Notifier: Send + Sync + 'static {
    /// Whether the client window currently has input focus.
    fn has_focus(&self) -> BoxFuture<'static, bool>;
    fn notify_messages(&self, notification: MessageNotification);
    fn play_sound(&self, cue: SoundCue);
}

/// Headless notifier: writes every signal to the log. Focus is a plain flag.
#[derive(Debug, Default)]
pub struct LogNotifier {
    focused: AtomicBool,
}

impl LogNotifier {
    pub fn new(focused: bool) -> Self {
        Self {
            focused: AtomicBool::new(focused),
        }
    }

    pub fn set_focused(&self, focused: bool) {
        self.focused.store(focused, Ordering::SeqCst);
    }
}

impl Notifier for LogNotifier {
    fn has_focus(&self) -> BoxFuture<'static, bool> {
        Box::pin(future::ready(self.focused.load(Ordering::SeqCst)))
    }

    fn notify_messages(&self, notification: MessageNotification) {
        tracing::info!(
            conversation = %notification.conversation.display_name(),
            local_id = %notification.conversation.local_id,
            count = notification.messages.len(),
            "notify"
        );
    }

    fn play_sound(&self, cue: SoundCue) {
        tracing::info!(cue = cue.tag(), "sound");
    }
}
