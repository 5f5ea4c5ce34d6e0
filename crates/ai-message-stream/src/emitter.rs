use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::warn;

use crate::message::Message;

type Listener = Arc<dyn Fn(&Message) + Send + Sync>;

struct Entry {
    id: u64,
    active: Arc<AtomicBool>,
    listener: Listener,
}

#[derive(Default)]
struct BusInner {
    listeners: Mutex<Vec<Entry>>,
    next_id: AtomicU64,
    disposed: AtomicBool,
}

impl BusInner {
    fn listeners(&self) -> MutexGuard<'_, Vec<Entry>> {
        // A poisoned lock only means a panic happened while the list was held;
        // the list itself is still consistent.
        self.listeners
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn remove(&self, id: u64) {
        self.listeners().retain(|entry| entry.id != id);
    }
}

/// Fan-out of message snapshots to registered listeners.
///
/// Delivery is synchronous and in emission order. Each broadcast works on a
/// snapshot of the listener list, so listeners may subscribe or unsubscribe
/// from inside a callback.
#[derive(Clone, Default)]
pub struct EmissionBus {
    inner: Arc<BusInner>,
}

impl EmissionBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. After `dispose` the listener is never called.
    pub fn subscribe(&self, listener: impl Fn(&Message) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(AtomicBool::new(!self.is_disposed()));
        if !self.is_disposed() {
            self.inner.listeners().push(Entry {
                id,
                active: active.clone(),
                listener: Arc::new(listener),
            });
        }
        Subscription {
            id,
            active,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Delivers `message` to every listener registered when the call starts.
    ///
    /// A listener that panics is logged and skipped; the remaining listeners
    /// still receive the message.
    pub fn emit(&self, message: &Message) {
        if self.is_disposed() {
            return;
        }
        let snapshot: Vec<(u64, Arc<AtomicBool>, Listener)> = self
            .inner
            .listeners()
            .iter()
            .map(|entry| (entry.id, entry.active.clone(), entry.listener.clone()))
            .collect();

        for (id, active, listener) in snapshot {
            if !active.load(Ordering::Acquire) || self.is_disposed() {
                continue;
            }
            if catch_unwind(AssertUnwindSafe(|| listener(message))).is_err() {
                warn!(listener_id = id, message_id = %message.id, "message listener panicked");
            }
        }
    }

    /// Drops all listeners; later emissions are no-ops.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::Release);
        let drained: Vec<Entry> = self.inner.listeners().drain(..).collect();
        for entry in &drained {
            entry.active.store(false, Ordering::Release);
        }
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners().len()
    }
}

/// Handle returned by `EmissionBus::subscribe`.
///
/// Dropping the handle keeps the listener registered; call `unsubscribe` to
/// remove it.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    active: Arc<AtomicBool>,
    bus: Weak<BusInner>,
}

impl Subscription {
    /// Removes the listener. Calling this more than once is a no-op.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(self.id);
        }
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }
}
