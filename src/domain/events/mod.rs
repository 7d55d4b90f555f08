//! Domain events and the in-process bus that delivers them

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CartEvent {
    ItemAdded { product_id: i64, qty: u32 },
    ItemRemoved { product_id: i64 },
    QuantityChanged { product_id: i64, qty: u32 },
    Cleared,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AuthEvent {
    LoggedIn { username: String },
    LoggedOut,
}

type Listener<E> = Arc<dyn Fn(&E) + Send + Sync>;

struct Registry<E> {
    next_id: u64,
    listeners: BTreeMap<u64, Listener<E>>,
}

/// Synchronous fan-out of events to whoever is subscribed at emission time.
///
/// Delivery happens on the emitting thread, in subscription order, once per
/// `emit`. Nothing is queued for listeners that subscribe later; they are
/// expected to read fresh state when they attach.
pub struct EventBus<E> {
    inner: Arc<Mutex<Registry<E>>>,
}

impl<E: 'static> EventBus<E> {
    pub fn new() -> Self {
        Self { inner: Arc::new(Mutex::new(Registry { next_id: 0, listeners: BTreeMap::new() })) }
    }

    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&E) + Send + Sync + 'static,
    {
        let id = {
            let mut registry = lock(&self.inner);
            let id = registry.next_id;
            registry.next_id += 1;
            registry.listeners.insert(id, Arc::new(listener));
            id
        };
        let weak = Arc::downgrade(&self.inner);
        Subscription {
            cancel: Some(Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    lock(&inner).listeners.remove(&id);
                }
            })),
        }
    }

    pub fn emit(&self, event: &E) {
        // Listeners run outside the lock so they may subscribe or emit themselves.
        let listeners: Vec<Listener<E>> = lock(&self.inner).listeners.values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }

    pub fn subscriber_count(&self) -> usize { lock(&self.inner).listeners.len() }
}

impl<E: 'static> Default for EventBus<E> {
    fn default() -> Self { Self::new() }
}

impl<E> Clone for EventBus<E> {
    fn clone(&self) -> Self { Self { inner: Arc::clone(&self.inner) } }
}

impl<E> fmt::Debug for EventBus<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

fn lock<E>(inner: &Mutex<Registry<E>>) -> MutexGuard<'_, Registry<E>> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Disposer returned by [`EventBus::subscribe`]. Dropping it unsubscribes.
#[must_use = "dropping a subscription unsubscribes the listener"]
pub struct Subscription {
    cancel: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() { cancel(); }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() { cancel(); }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription").field("active", &self.cancel.is_some()).finish()
    }
}
