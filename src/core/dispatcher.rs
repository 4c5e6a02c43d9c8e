//! In-process publish/subscribe fan-out of connection events.
//!
//! Callbacks run synchronously on the emitting task, in registration order. A panicking
//! callback is contained and logged; the remaining callbacks for the event still run.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::error;

use super::protocol::Notification;

/// Events published by the notification client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    Connected,
    Disconnected,
    Notification(Notification),
    Error(String),
    /// Reconnect attempts are used up; only an explicit `connect` retries.
    ReconnectExhausted { attempts: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealtimeEventKind {
    Connected,
    Disconnected,
    Notification,
    Error,
    ReconnectExhausted,
}

impl RealtimeEvent {
    pub fn kind(&self) -> RealtimeEventKind {
        match self {
            RealtimeEvent::Connected => RealtimeEventKind::Connected,
            RealtimeEvent::Disconnected => RealtimeEventKind::Disconnected,
            RealtimeEvent::Notification(_) => RealtimeEventKind::Notification,
            RealtimeEvent::Error(_) => RealtimeEventKind::Error,
            RealtimeEvent::ReconnectExhausted { .. } => RealtimeEventKind::ReconnectExhausted,
        }
    }
}

impl RealtimeEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            RealtimeEventKind::Connected => "connected",
            RealtimeEventKind::Disconnected => "disconnected",
            RealtimeEventKind::Notification => "notification",
            RealtimeEventKind::Error => "error",
            RealtimeEventKind::ReconnectExhausted => "reconnect_exhausted",
        }
    }
}

type Listener = Arc<dyn Fn(&RealtimeEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    listeners: HashMap<RealtimeEventKind, Vec<(u64, Listener)>>,
}

#[derive(Default)]
struct DispatcherInner {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
}

/// Listener registry shared between the connection actor and its callers.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    inner: Arc<DispatcherInner>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.inner.registry.lock();
        let total: usize = registry.listeners.values().map(Vec::len).sum();
        f.debug_struct("EventDispatcher")
            .field("listeners", &total)
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for `kind`.
    pub fn on<F>(&self, kind: RealtimeEventKind, callback: F) -> Subscription
    where
        F: Fn(&RealtimeEvent) + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registry
            .lock()
            .listeners
            .entry(kind)
            .or_default()
            .push((id, Arc::new(callback)));

        Subscription {
            dispatcher: Arc::downgrade(&self.inner),
            kind,
            id,
        }
    }

    pub fn emit(&self, event: &RealtimeEvent) {
        let kind = event.kind();
        // Snapshot so callbacks may (un)subscribe without deadlocking. Listeners added
        // during the emit wait for the next event.
        let listeners: Vec<(u64, Listener)> = {
            let registry = self.inner.registry.lock();
            match registry.listeners.get(&kind) {
                Some(list) => list.iter().map(|(id, cb)| (*id, Arc::clone(cb))).collect(),
                None => return,
            }
        };

        for (id, listener) in listeners {
            // Skip anything an earlier callback unsubscribed.
            if !self.is_registered(kind, id) {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                error!(event = kind.as_str(), "realtime event listener panicked");
            }
        }
    }

    fn is_registered(&self, kind: RealtimeEventKind, id: u64) -> bool {
        self.inner
            .registry
            .lock()
            .listeners
            .get(&kind)
            .is_some_and(|list| list.iter().any(|(listener_id, _)| *listener_id == id))
    }

    pub fn listener_count(&self, kind: RealtimeEventKind) -> usize {
        self.inner
            .registry
            .lock()
            .listeners
            .get(&kind)
            .map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.inner.registry.lock().listeners.clear();
    }
}

/// Handle returned by [`EventDispatcher::on`].
///
/// Dropping the handle keeps the listener registered; call [`Subscription::unsubscribe`].
#[derive(Debug, Clone)]
pub struct Subscription {
    dispatcher: Weak<DispatcherInner>,
    kind: RealtimeEventKind,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        let Some(inner) = self.dispatcher.upgrade() else {
            return;
        };
        let mut registry = inner.registry.lock();
        if let Some(list) = registry.listeners.get_mut(&self.kind) {
            list.retain(|(id, _)| *id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn listeners_run_in_registration_order() {
        let dispatcher = EventDispatcher::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for tag in ["first", "second", "third"] {
            let seen = seen.clone();
            dispatcher.on(RealtimeEventKind::Connected, move |_| seen.lock().push(tag));
        }

        dispatcher.emit(&RealtimeEvent::Connected);
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn unsubscribe_before_emit_never_invokes_callback() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let sub = dispatcher.on(RealtimeEventKind::Error, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sub.unsubscribe();
        sub.unsubscribe();
        dispatcher.emit(&RealtimeEvent::Error("boom".to_string()));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.listener_count(RealtimeEventKind::Error), 0);
    }

    #[test]
    fn panicking_listener_does_not_stop_the_rest() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));

        dispatcher.on(RealtimeEventKind::Disconnected, |_| panic!("listener bug"));
        let counter = calls.clone();
        dispatcher.on(RealtimeEventKind::Disconnected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.emit(&RealtimeEvent::Disconnected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn events_only_reach_their_own_kind() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        dispatcher.on(RealtimeEventKind::Notification, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        dispatcher.emit(&RealtimeEvent::Connected);
        dispatcher.emit(&RealtimeEvent::ReconnectExhausted { attempts: 5 });
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn listener_may_unsubscribe_itself_during_emit() {
        let dispatcher = EventDispatcher::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let counter = calls.clone();
        let own = slot.clone();
        let sub = dispatcher.on(RealtimeEventKind::Connected, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            if let Some(sub) = own.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        *slot.lock() = Some(sub);

        dispatcher.emit(&RealtimeEvent::Connected);
        dispatcher.emit(&RealtimeEvent::Connected);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn listener_removed_mid_emit_is_skipped() {
        let dispatcher = EventDispatcher::new();
        let later_calls = Arc::new(AtomicUsize::new(0));
        let later: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));

        let target = later.clone();
        dispatcher.on(RealtimeEventKind::Notification, move |_| {
            if let Some(sub) = target.lock().as_ref() {
                sub.unsubscribe();
            }
        });
        let counter = later_calls.clone();
        let sub = dispatcher.on(RealtimeEventKind::Notification, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        *later.lock() = Some(sub);

        dispatcher.emit(&RealtimeEvent::Error("unrelated".to_string()));
        dispatcher.emit(&RealtimeEvent::Notification(crate::core::Notification {
            id: 1,
            kind: "booking_confirmed".to_string(),
            title: "Booked".to_string(),
            message: "See you Saturday".to_string(),
            is_read: false,
            created_at: chrono::Utc::now(),
        }));

        assert_eq!(later_calls.load(Ordering::SeqCst), 0);
        assert_eq!(dispatcher.listener_count(RealtimeEventKind::Notification), 1);
    }
}
