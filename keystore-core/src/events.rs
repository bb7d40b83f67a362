//! Typed publish/subscribe for key lifecycle transitions.
//!
//! Handlers are plain closures over a [`KeyEvent`]. They run synchronously, in
//! subscription order, on the thread that caused the transition. A handler
//! that needs the store must capture a handle to it explicitly.

use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// Kind of lifecycle transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A key went from absent to present
    Created,
    /// A present key received a different value
    Updated,
    /// A present key was read
    Read,
    /// A present key was explicitly deleted
    Deleted,
    /// A key reached its expiry
    Expired,
}

impl EventKind {
    /// Every event kind, in declaration order
    pub const ALL: [EventKind; 5] = [
        EventKind::Created,
        EventKind::Updated,
        EventKind::Read,
        EventKind::Deleted,
        EventKind::Expired,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EventKind::Created => "created",
            EventKind::Updated => "updated",
            EventKind::Read => "read",
            EventKind::Deleted => "deleted",
            EventKind::Expired => "expired",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload delivered to every handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent<K> {
    /// The key the transition applies to
    pub name: K,
}

/// Shared event handler
pub type Handler<K> = Arc<dyn Fn(&KeyEvent<K>) + Send + Sync>;

struct Registration<K> {
    id: u64,
    kind: EventKind,
    handler: Handler<K>,
}

struct BusInner<K> {
    registrations: Mutex<Vec<Registration<K>>>,
    next_id: AtomicU64,
}

impl<K> BusInner<K> {
    fn remove_id(&self, id: u64) -> bool {
        let mut registrations = self.registrations.lock();
        match registrations.iter().position(|r| r.id == id) {
            Some(index) => {
                registrations.remove(index);
                true
            }
            None => false,
        }
    }
}

/// Publish/subscribe bus keyed by [`EventKind`]
pub struct EventBus<K> {
    inner: Arc<BusInner<K>>,
}

impl<K> Default for EventBus<K> {
    fn default() -> Self {
        Self {
            inner: Arc::new(BusInner {
                registrations: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }
}

impl<K> EventBus<K> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `kind`; the returned handle unsubscribes it
    pub fn subscribe(&self, kind: EventKind, handler: Handler<K>) -> Subscription<K> {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registrations
            .lock()
            .push(Registration { id, kind, handler });

        Subscription {
            id,
            kind,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Removes the first registration of exactly this handler for `kind`.
    ///
    /// Returns `false` if it was not registered.
    pub fn unsubscribe(&self, kind: EventKind, handler: &Handler<K>) -> bool {
        let mut registrations = self.inner.registrations.lock();
        let found = registrations
            .iter()
            .position(|r| r.kind == kind && Arc::ptr_eq(&r.handler, handler));
        match found {
            Some(index) => {
                registrations.remove(index);
                true
            }
            None => false,
        }
    }

    /// Delivers `event` to the handlers registered for `kind` at call time
    pub fn emit(&self, kind: EventKind, event: &KeyEvent<K>) {
        let handlers: Vec<Handler<K>> = self
            .inner
            .registrations
            .lock()
            .iter()
            .filter(|r| r.kind == kind)
            .map(|r| Arc::clone(&r.handler))
            .collect();

        for handler in handlers {
            handler(event);
        }
    }
}

/// Handle to one registration.
///
/// Dropping it leaves the handler registered; call
/// [`unsubscribe`](Self::unsubscribe) to remove it.
pub struct Subscription<K> {
    id: u64,
    kind: EventKind,
    bus: Weak<BusInner<K>>,
}

impl<K> Subscription<K> {
    /// The event kind this registration listens to
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Removes the handler from the bus.
    ///
    /// Returns `false` if it had already been removed or the bus is gone.
    pub fn unsubscribe(self) -> bool {
        self.bus
            .upgrade()
            .is_some_and(|bus| bus.remove_id(self.id))
    }
}

impl<K> fmt::Debug for Subscription<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .finish()
    }
}
