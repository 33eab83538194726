use std::sync::mpsc;

use serde::Serialize;

use vault_types::OpaqueReference;

/// Change to the set of notifications held by a model.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "reference", rename_all = "snake_case")]
pub enum ModelEvent {
    NotificationAdded(OpaqueReference),
    NotificationRemoved(OpaqueReference),
    NotificationResponded(OpaqueReference),
}

impl ModelEvent {
    pub fn reference(&self) -> &OpaqueReference {
        match self {
            Self::NotificationAdded(r) | Self::NotificationRemoved(r) | Self::NotificationResponded(r) => r,
        }
    }
}

/// Handle returned by listener registration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(pub(crate) u64);

/// Receiver of model change events.
///
/// Returning `false` unregisters the listener.
pub trait ModelListener: Send {
    fn on_event(&self, event: &ModelEvent) -> bool;
}

impl<F> ModelListener for F
where
    F: Fn(&ModelEvent) + Send,
{
    fn on_event(&self, event: &ModelEvent) -> bool {
        self(event);
        true
    }
}

/// Forwards events into a channel so a host event loop can drain them on
/// its own thread. Unregisters itself once the receiver is dropped.
pub struct ChannelListener {
    sender: mpsc::Sender<ModelEvent>,
}

impl ChannelListener {
    pub fn new() -> (Self, mpsc::Receiver<ModelEvent>) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, receiver)
    }
}

impl ModelListener for ChannelListener {
    fn on_event(&self, event: &ModelEvent) -> bool {
        self.sender.send(event.clone()).is_ok()
    }
}

/// Registered listeners in registration order.
#[derive(Default)]
pub(crate) struct ListenerSet {
    next: u64,
    listeners: Vec<(ListenerId, Box<dyn ModelListener>)>,
}

impl ListenerSet {
    pub(crate) fn add(&mut self, listener: Box<dyn ModelListener>) -> ListenerId {
        let id = ListenerId(self.next);
        self.next += 1;
        self.listeners.push((id, listener));
        id
    }

    pub(crate) fn remove(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(existing, _)| *existing != id);
        self.listeners.len() != before
    }

    /// Deliver to every listener, pruning those that hung up.
    pub(crate) fn emit(&mut self, event: &ModelEvent) {
        self.listeners.retain(|(_, listener)| listener.on_event(event));
    }

    pub(crate) fn len(&self) -> usize {
        self.listeners.len()
    }
}

impl std::fmt::Debug for ListenerSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSet")
            .field("count", &self.listeners.len())
            .finish()
    }
}
