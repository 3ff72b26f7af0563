//! Endpoint lifecycle events.
//!
//! The connection monitor reports through an [`EventNotifier`] handed to it
//! at construction. Reconnection and dead-letter routing are up to whoever
//! subscribes.

use std::cell::RefCell;
use std::rc::Rc;

use tokio::sync::mpsc;

/// The connection to `address` is gone.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointTerminatedEvent {
    /// Remote address the writer was bound to.
    pub address: String,
}

/// Publish side of the event sink.
pub trait EventNotifier {
    /// Deliver `event` to every current subscriber.
    fn publish(&self, event: EndpointTerminatedEvent);
}

impl EventNotifier for mpsc::UnboundedSender<EndpointTerminatedEvent> {
    fn publish(&self, event: EndpointTerminatedEvent) {
        if self.send(event).is_err() {
            tracing::debug!("endpoint event dropped: receiver closed");
        }
    }
}

impl<E: EventNotifier + ?Sized> EventNotifier for Rc<E> {
    fn publish(&self, event: EndpointTerminatedEvent) {
        (**self).publish(event)
    }
}

/// Handle returned by [`EventStream::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Rc<dyn Fn(&EndpointTerminatedEvent)>;

#[derive(Default)]
struct Subscribers {
    next_id: u64,
    entries: Vec<(SubscriptionId, Callback)>,
}

/// Single-threaded publish/subscribe hub.
///
/// Cloning shares the subscriber list.
#[derive(Clone, Default)]
pub struct EventStream {
    subscribers: Rc<RefCell<Subscribers>>,
}

impl EventStream {
    /// Stream with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Call `callback` for every future event.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&EndpointTerminatedEvent) + 'static,
    {
        let mut subscribers = self.subscribers.borrow_mut();
        let id = SubscriptionId(subscribers.next_id);
        subscribers.next_id += 1;
        subscribers.entries.push((id, Rc::new(callback)));
        id
    }

    /// Forward every future event into a channel.
    pub fn subscribe_channel(
        &self,
    ) -> (SubscriptionId, mpsc::UnboundedReceiver<EndpointTerminatedEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(move |event| tx.publish(event.clone()));
        (id, rx)
    }

    /// Stop delivering to `id`. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.borrow_mut();
        let before = subscribers.entries.len();
        subscribers.entries.retain(|(entry, _)| *entry != id);
        subscribers.entries.len() != before
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.borrow().entries.len()
    }
}

impl EventNotifier for EventStream {
    fn publish(&self, event: EndpointTerminatedEvent) {
        // Snapshot so callbacks may subscribe or unsubscribe re-entrantly.
        let callbacks: Vec<Callback> = self
            .subscribers
            .borrow()
            .entries
            .iter()
            .map(|(_, cb)| cb.clone())
            .collect();
        tracing::debug!(
            "publishing endpoint terminated for {} to {} subscribers",
            event.address,
            callbacks.len()
        );
        for callback in callbacks {
            callback(&event);
        }
    }
}
