use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync + 'static>;

struct Inner<T> {
    next_id: u64,
    listeners: Vec<(SubscriptionId, Listener<T>)>,
}

/// Minimal publish/subscribe channel. Listeners run synchronously on the
/// emitting thread, in subscription order.
pub struct EventEmitter<T> {
    inner: Mutex<Inner<T>>,
}

impl<T> Default for EventEmitter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> EventEmitter<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                listeners: Vec::new(),
            }),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionId {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        let id = SubscriptionId(inner.next_id);
        inner.next_id = inner.next_id.saturating_add(1);
        inner.listeners.push((id, Arc::new(listener)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut inner = match self.inner.lock() {
            Ok(g) => g,
            Err(poison) => poison.into_inner(),
        };
        let before = inner.listeners.len();
        inner.listeners.retain(|(sid, _)| *sid != id);
        inner.listeners.len() != before
    }

    pub fn emit(&self, event: &T) {
        // Snapshot first so a listener may (un)subscribe without deadlocking.
        let listeners: Vec<Listener<T>> = {
            let inner = match self.inner.lock() {
                Ok(g) => g,
                Err(poison) => poison.into_inner(),
            };
            inner.listeners.iter().map(|(_, l)| l.clone()).collect()
        };
        for listener in listeners {
            listener(event);
        }
    }

    pub fn listener_count(&self) -> usize {
        match self.inner.lock() {
            Ok(g) => g.listeners.len(),
            Err(poison) => poison.into_inner().listeners.len(),
        }
    }
}
