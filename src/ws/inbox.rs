//! In-memory notification store fed by the dispatcher.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{EventDispatcher, Notification, RealtimeEvent, RealtimeEventKind, Subscription};

pub const DEFAULT_INBOX_CAPACITY: usize = 50;

#[derive(Debug)]
struct InboxState {
    // Newest first.
    items: VecDeque<Notification>,
    capacity: usize,
}

#[derive(Debug)]
pub struct NotificationInbox {
    state: Arc<Mutex<InboxState>>,
    subscription: Option<Subscription>,
}

/// Clones read and mutate the same items; only the original owns the dispatcher
/// subscription, so detaching a clone never silences the inbox.
impl Clone for NotificationInbox {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            subscription: None,
        }
    }
}

impl NotificationInbox {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Arc::new(Mutex::new(InboxState {
                items: VecDeque::new(),
                capacity: capacity.max(1),
            })),
            subscription: None,
        }
    }

    /// Inbox that records every `Notification` event emitted by `dispatcher`.
    pub fn attach(dispatcher: &EventDispatcher, capacity: usize) -> Self {
        let mut inbox = Self::new(capacity);
        let state = Arc::clone(&inbox.state);
        inbox.subscription = Some(dispatcher.on(
            RealtimeEventKind::Notification,
            move |event| {
                if let RealtimeEvent::Notification(notification) = event {
                    push_into(&mut state.lock(), notification.clone());
                }
            },
        ));
        inbox
    }

    pub fn push(&self, notification: Notification) {
        push_into(&mut self.state.lock(), notification);
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.state.lock().items.iter().cloned().collect()
    }

    pub fn unread_count(&self) -> usize {
        self.state.lock().items.iter().filter(|n| !n.is_read).count()
    }

    /// Returns false when `id` is not in the inbox.
    pub fn mark_read(&self, id: u64) -> bool {
        let mut state = self.state.lock();
        match state.items.iter_mut().find(|n| n.id == id) {
            Some(notification) => {
                notification.is_read = true;
                true
            }
            None => false,
        }
    }

    pub fn mark_all_read(&self) {
        for notification in self.state.lock().items.iter_mut() {
            notification.is_read = true;
        }
    }

    /// Stop receiving notifications; the stored items remain readable.
    pub fn detach(&mut self) {
        if let Some(subscription) = self.subscription.take() {
            subscription.unsubscribe();
        }
    }
}

fn push_into(state: &mut InboxState, notification: Notification) {
    // A re-sent notification replaces the stored copy.
    state.items.retain(|n| n.id != notification.id);
    state.items.push_front(notification);
    let capacity = state.capacity;
    state.items.truncate(capacity);
}
