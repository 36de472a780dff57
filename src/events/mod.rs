//! Typed observer bus
//!
//! Components publish status changes and payloads through an [`EventBus`].
//! Every subscription returns a [`SubscriptionId`] that must be handed back to
//! [`EventBus::unsubscribe`] to stop delivery.
//!
//! Delivery is synchronous: [`EventBus::emit`] invokes every listener on the
//! caller's stack, in subscription order, before returning.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Token identifying one subscription on one bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Listeners<T> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Listener<T>)>,
}

/// A list of listeners for events of type `T`
///
/// Clones share the same listener list.
pub struct EventBus<T> {
    listeners: Arc<Mutex<Listeners<T>>>,
}

impl<T> EventBus<T> {
    /// Create an empty bus
    #[must_use]
    pub fn new() -> Self {
        Self {
            listeners: Arc::new(Mutex::new(Listeners {
                next_id: 0,
                entries: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Listeners<T>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a listener
    pub fn subscribe<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let mut listeners = self.lock();
        let id = SubscriptionId(listeners.next_id);
        listeners.next_id += 1;
        listeners.entries.push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener
    ///
    /// Returns `false` if the id was unknown (already removed or from another bus).
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.entries.len();
        listeners.entries.retain(|(entry, _)| *entry != id);
        listeners.entries.len() != before
    }

    /// Deliver an event to every current listener
    pub fn emit(&self, event: &T) {
        // Snapshot so listeners can (un)subscribe without deadlocking
        let snapshot: Vec<Listener<T>> = self
            .lock()
            .entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();

        for listener in snapshot {
            listener(event);
        }
    }

    /// Number of registered listeners
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    /// Whether no listener is registered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Drop every listener
    pub fn clear(&self) {
        self.lock().entries.clear();
    }
}

impl<T> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for EventBus<T> {
    fn clone(&self) -> Self {
        Self {
            listeners: Arc::clone(&self.listeners),
        }
    }
}

impl<T> fmt::Debug for EventBus<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn emit_reaches_listeners_in_order() {
        let bus = EventBus::<u32>::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let first = Arc::clone(&seen);
        bus.subscribe(move |v| first.lock().unwrap().push(("a", *v)));
        let second = Arc::clone(&seen);
        bus.subscribe(move |v| second.lock().unwrap().push(("b", *v)));

        bus.emit(&7);

        assert_eq!(*seen.lock().unwrap(), vec![("a", 7), ("b", 7)]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::<()>::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let id = bus.subscribe(move |()| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(&());
        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        bus.emit(&());

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(bus.is_empty());
    }

    #[test]
    fn listener_may_unsubscribe_itself() {
        let bus = EventBus::<u8>::new();
        let slot: Arc<Mutex<Option<SubscriptionId>>> = Arc::new(Mutex::new(None));

        let inner_bus = bus.clone();
        let inner_slot = Arc::clone(&slot);
        let id = bus.subscribe(move |_| {
            if let Some(id) = inner_slot.lock().unwrap().take() {
                inner_bus.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);

        bus.emit(&1);
        assert_eq!(bus.len(), 0);
    }

    #[test]
    fn clones_share_listeners() {
        let bus = EventBus::<i32>::new();
        let other = bus.clone();
        other.subscribe(|_| {});
        assert_eq!(bus.len(), 1);
        bus.clear();
        assert!(other.is_empty());
    }
}
