#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bluebubbles_core::notify::{MessageNotification, Notifier, SoundCue};
use bluebubbles_core::{AppReconciler, AppUpdate};
use futures::future::{self, BoxFuture};

pub fn write_config(data_dir: &str, config: serde_json::Value) {
    let path = std::path::Path::new(data_dir).join("bluebubbles_config.json");
    std::fs::write(path, serde_json::to_vec(&config).unwrap()).unwrap();
}

pub fn wait_until(what: &str, timeout: Duration, mut f: impl FnMut() -> bool) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if f() {
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    panic!("{what}: condition not met within {timeout:?}");
}

/// Notifier that records instead of showing anything.
#[derive(Default)]
pub struct RecordingNotifier {
    pub focused: AtomicBool,
    pub notifications: Mutex<Vec<MessageNotification>>,
    pub sounds: Mutex<Vec<SoundCue>>,
}

impl RecordingNotifier {
    pub fn notification_count(&self) -> usize {
        self.notifications.lock().unwrap().len()
    }

    pub fn sound_count(&self) -> usize {
        self.sounds.lock().unwrap().len()
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

#[derive(Clone)]
pub struct Collector {
    pub updates: Arc<Mutex<Vec<AppUpdate>>>,
}

impl AppReconciler for Collector {
    fn reconcile(&self, update: AppUpdate) {
        self.updates.lock().unwrap().push(update);
    }
}
