//! Process-wide fan-out of envelopes and status changes.
//!
//! [`SubscriberRegistry`] holds two independent callback sets: event
//! callbacks and status callbacks. Dispatch iterates over a snapshot of the
//! set, so callbacks may subscribe or unsubscribe while a dispatch is in
//! progress. A panicking callback is caught and logged; its siblings still
//! receive the same value in the same dispatch call.

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use super::{ConnectionStatus, Envelope};

type EventFn = dyn Fn(&Envelope) + Send + Sync;
type StatusFn = dyn Fn(ConnectionStatus) + Send + Sync;

/// Identifier of a single registered callback.
pub type SubscriberId = u64;

/// Registration-ordered set of callbacks of one kind.
struct CallbackSet<F: ?Sized> {
    next_id: SubscriberId,
    entries: Vec<(SubscriberId, Arc<F>)>,
}

impl<F: ?Sized> CallbackSet<F> {
    const fn new() -> Self {
        Self {
            next_id: 1,
            entries: Vec::new(),
        }
    }

    fn insert(&mut self, callback: Arc<F>) -> SubscriberId {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, callback));
        id
    }

    /// Detaches the entry; the caller drops it once the lock is released.
    fn remove(&mut self, id: SubscriberId) -> Option<Arc<F>> {
        let index = self.entries.iter().position(|(entry_id, _)| *entry_id == id)?;
        Some(self.entries.remove(index).1)
    }

    fn snapshot(&self) -> Vec<(SubscriberId, Arc<F>)> {
        self.entries
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect()
    }
}

struct RegistryInner {
    events: Mutex<CallbackSet<EventFn>>,
    statuses: Mutex<CallbackSet<StatusFn>>,
}

/// Recovers the guard from a poisoned lock. Callbacks never run while a
/// registry lock is held, so the protected set is always consistent.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Shared registry of event and status subscribers.
///
/// Cheap to clone; all clones share the same sets.
#[derive(Clone)]
pub struct SubscriberRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriberRegistry {
    /// Creates a registry with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                events: Mutex::new(CallbackSet::new()),
                statuses: Mutex::new(CallbackSet::new()),
            }),
        }
    }

    /// Registers an event callback.
    ///
    /// The callback stays registered until the returned [`Subscription`] is
    /// unsubscribed or dropped.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        let id = lock(&self.inner.events).insert(Arc::new(callback));
        self.handle(SubscriptionKind::Event, id)
    }

    /// Registers a status callback.
    #[must_use = "dropping the Subscription unsubscribes immediately"]
    pub fn subscribe_status<F>(&self, callback: F) -> Subscription
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        let id = lock(&self.inner.statuses).insert(Arc::new(callback));
        self.handle(SubscriptionKind::Status, id)
    }

    fn handle(&self, kind: SubscriptionKind, id: SubscriberId) -> Subscription {
        Subscription {
            registry: Arc::downgrade(&self.inner),
            kind,
            id,
            active: true,
        }
    }

    /// Delivers `envelope` to every event subscriber.
    ///
    /// Returns the number of callbacks that returned normally.
    pub fn dispatch_event(&self, envelope: &Envelope) -> usize {
        let snapshot = lock(&self.inner.events).snapshot();
        let mut delivered = 0;
        for (id, callback) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(envelope))) {
                Ok(()) => delivered += 1,
                Err(payload) => tracing::error!(
                    subscriber = id,
                    event = %envelope.event,
                    panic = panic_message(payload.as_ref()),
                    "event subscriber panicked"
                ),
            }
        }
        delivered
    }

    /// Delivers `status` to every status subscriber.
    ///
    /// Returns the number of callbacks that returned normally.
    pub fn dispatch_status(&self, status: ConnectionStatus) -> usize {
        let snapshot = lock(&self.inner.statuses).snapshot();
        let mut delivered = 0;
        for (id, callback) in snapshot {
            match panic::catch_unwind(AssertUnwindSafe(|| callback(status))) {
                Ok(()) => delivered += 1,
                Err(payload) => tracing::error!(
                    subscriber = id,
                    %status,
                    panic = panic_message(payload.as_ref()),
                    "status subscriber panicked"
                ),
            }
        }
        delivered
    }

    /// Returns the number of registered event callbacks.
    #[must_use]
    pub fn event_subscriber_count(&self) -> usize {
        lock(&self.inner.events).entries.len()
    }

    /// Returns the number of registered status callbacks.
    #[must_use]
    pub fn status_subscriber_count(&self) -> usize {
        lock(&self.inner.statuses).entries.len()
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriberRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriberRegistry")
            .field("event_subscribers", &self.event_subscriber_count())
            .field("status_subscribers", &self.status_subscriber_count())
            .finish()
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SubscriptionKind {
    Event,
    Status,
}

/// Handle to a registered callback.
///
/// Unsubscribes exactly that callback on [`Subscription::unsubscribe`] or
/// when dropped. Outliving the registry is harmless.
pub struct Subscription {
    registry: Weak<RegistryInner>,
    kind: SubscriptionKind,
    id: SubscriberId,
    active: bool,
}

impl Subscription {
    /// Returns the identifier of the registered callback.
    #[must_use]
    pub const fn id(&self) -> SubscriberId {
        self.id
    }

    /// Removes the callback. Returns `true` if it was still registered.
    pub fn unsubscribe(mut self) -> bool {
        self.remove()
    }

    fn remove(&mut self) -> bool {
        if !self.active {
            return false;
        }
        self.active = false;
        let Some(inner) = self.registry.upgrade() else {
            return false;
        };
        match self.kind {
            SubscriptionKind::Event => {
                let removed = lock(&inner.events).remove(self.id);
                removed.is_some()
            }
            SubscriptionKind::Status => {
                let removed = lock(&inner.statuses).remove(self.id);
                removed.is_some()
            }
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("kind", &self.kind)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}
