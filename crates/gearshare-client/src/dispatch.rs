//! Fan-out of hub events to subscribers.
//!
//! Each event kind has its own insertion-ordered registry. Every inbound
//! event is handed to every subscriber registered at that moment, in
//! registration order. There is no buffering: with no subscribers the event
//! is dropped.

use crate::lock;
use gearshare_core::{ChatId, EventKind, HubEvent, Message, MessageRead, UnreadCount};
use serde_json::Value;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, Weak};

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Registry<T> {
    next_id: u64,
    entries: Vec<(u64, Callback<T>)>,
}

impl<T> Registry<T> {
    fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    fn insert(&mut self, callback: Callback<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, callback));
        id
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    fn snapshot(&self) -> Vec<Callback<T>> {
        self.entries.iter().map(|(_, cb)| cb.clone()).collect()
    }
}

struct Registries {
    messages: Mutex<Registry<Message>>,
    reads: Mutex<Registry<MessageRead>>,
    chats: Mutex<Registry<ChatId>>,
    unread: Mutex<Registry<UnreadCount>>,
}

impl Registries {
    fn remove(&self, kind: EventKind, id: u64) -> bool {
        match kind {
            EventKind::MessageReceived => lock(&self.messages).remove(id),
            EventKind::MessageRead => lock(&self.reads).remove(id),
            EventKind::ChatUpdated => lock(&self.chats).remove(id),
            EventKind::UnreadCountChanged => lock(&self.unread).remove(id),
        }
    }
}

/// Registry of event subscribers, shared by every clone.
#[derive(Clone)]
pub struct EventDispatcher {
    registries: Arc<Registries>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self {
            registries: Arc::new(Registries {
                messages: Mutex::new(Registry::new()),
                reads: Mutex::new(Registry::new()),
                chats: Mutex::new(Registry::new()),
                unread: Mutex::new(Registry::new()),
            }),
        }
    }

    pub fn on_message_received(
        &self,
        callback: impl Fn(&Message) + Send + Sync + 'static,
    ) -> Subscription {
        let id = lock(&self.registries.messages).insert(Arc::new(callback));
        self.subscription(EventKind::MessageReceived, id)
    }

    pub fn on_message_read(
        &self,
        callback: impl Fn(&MessageRead) + Send + Sync + 'static,
    ) -> Subscription {
        let id = lock(&self.registries.reads).insert(Arc::new(callback));
        self.subscription(EventKind::MessageRead, id)
    }

    pub fn on_chat_updated(&self, callback: impl Fn(&ChatId) + Send + Sync + 'static) -> Subscription {
        let id = lock(&self.registries.chats).insert(Arc::new(callback));
        self.subscription(EventKind::ChatUpdated, id)
    }

    pub fn on_unread_count_changed(
        &self,
        callback: impl Fn(&UnreadCount) + Send + Sync + 'static,
    ) -> Subscription {
        let id = lock(&self.registries.unread).insert(Arc::new(callback));
        self.subscription(EventKind::UnreadCountChanged, id)
    }

    fn subscription(&self, kind: EventKind, id: u64) -> Subscription {
        tracing::debug!("Subscribed to {} ({})", kind, id);
        Subscription {
            kind,
            id,
            registries: Arc::downgrade(&self.registries),
            active: true,
        }
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::MessageReceived => lock(&self.registries.messages).entries.len(),
            EventKind::MessageRead => lock(&self.registries.reads).entries.len(),
            EventKind::ChatUpdated => lock(&self.registries.chats).entries.len(),
            EventKind::UnreadCountChanged => lock(&self.registries.unread).entries.len(),
        }
    }

    /// Deliver a decoded event to every current subscriber of its kind.
    pub fn dispatch(&self, event: &HubEvent) {
        match event {
            HubEvent::MessageReceived(message) => fan_out(&self.registries.messages, event.kind(), message),
            HubEvent::MessageRead(read) => fan_out(&self.registries.reads, event.kind(), read),
            HubEvent::ChatUpdated(chat_id) => fan_out(&self.registries.chats, event.kind(), chat_id),
            HubEvent::UnreadCountChanged(count) => fan_out(&self.registries.unread, event.kind(), count),
        }
    }

    /// Decode transport arguments for `kind` and dispatch them.
    ///
    /// Malformed payloads are logged and dropped.
    pub fn dispatch_raw(&self, kind: EventKind, args: &[Value]) {
        match HubEvent::decode_kind(kind, args) {
            Ok(event) => self.dispatch(&event),
            Err(e) => tracing::warn!("Dropping hub event: {}", e),
        }
    }
}

fn fan_out<T>(registry: &Mutex<Registry<T>>, kind: EventKind, payload: &T) {
    // Callbacks run outside the lock so they may subscribe or unsubscribe.
    let callbacks = lock(registry).snapshot();
    if callbacks.is_empty() {
        tracing::debug!("No subscribers for {}, dropping", kind);
        return;
    }
    for (index, callback) in callbacks.iter().enumerate() {
        if catch_unwind(AssertUnwindSafe(|| callback(payload))).is_err() {
            tracing::warn!("{} subscriber #{} panicked", kind, index);
        }
    }
}

/// Handle to a registered callback.
///
/// Dropping the handle unsubscribes; call [`detach`](Self::detach) to keep
/// the callback registered for the dispatcher's lifetime.
#[must_use = "dropping a Subscription unsubscribes it immediately"]
pub struct Subscription {
    kind: EventKind,
    id: u64,
    registries: Weak<Registries>,
    active: bool,
}

impl Subscription {
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    pub fn unsubscribe(mut self) {
        self.remove();
    }

    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !std::mem::replace(&mut self.active, false) {
            return;
        }
        if let Some(registries) = self.registries.upgrade()
            && registries.remove(self.kind, self.id)
        {
            tracing::debug!("Unsubscribed from {} ({})", self.kind, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}
