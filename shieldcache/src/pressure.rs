//! Process-wide low-memory signal.
//!
//! `MemoryPressure` is a subscribable event source with no payload. Caches
//! subscribe on construction and drop their in-memory tier whenever the
//! signal fires. The host application owns one `MemoryPressure` and clones
//! the handle into every component that should react to it.
//!
//! Listeners are invoked synchronously, in registration order, on the
//! thread that calls [`MemoryPressure::notify`]. A [`Subscription`] removes
//! its listener when dropped, so a listener never outlives its owner.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, warn};

type Listener = Arc<dyn Fn() + Send + Sync>;

/// Identifier of a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registry {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
    next_id: AtomicU64,
}

/// Broadcast handle for the low-memory signal.
///
/// Cloning is cheap; all clones share the same listener registry.
#[derive(Clone)]
pub struct MemoryPressure {
    registry: Arc<Registry>,
}

impl MemoryPressure {
    /// Create a signal with no listeners.
    pub fn new() -> Self {
        Self {
            registry: Arc::new(Registry {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Register a listener.
    ///
    /// The listener stays registered until the returned [`Subscription`]
    /// is dropped.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let id = ListenerId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        self.registry
            .listeners
            .lock()
            .push((id, Arc::new(listener)));
        debug!(listener = id.0, "Memory pressure listener registered");

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Broadcast the low-memory signal to every live listener.
    ///
    /// The registry lock is released before listeners run, so a listener
    /// may subscribe or unsubscribe without deadlocking. A panicking
    /// listener is logged and the remaining listeners still run.
    pub fn notify(&self) {
        let listeners: Vec<(ListenerId, Listener)> = self.registry.listeners.lock().clone();

        debug!(listeners = listeners.len(), "Broadcasting memory pressure");

        for (id, listener) in listeners {
            let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| listener()));
            if outcome.is_err() {
                warn!(listener = id.0, "Memory pressure listener panicked");
            }
        }
    }

    /// Number of currently registered listeners.
    pub fn listener_count(&self) -> usize {
        self.registry.listeners.lock().len()
    }
}

impl Default for MemoryPressure {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryPressure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryPressure")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

/// Registration guard returned by [`MemoryPressure::subscribe`].
///
/// Dropping the guard unregisters the listener. The guard holds only a weak
/// reference to the registry, so it may outlive the signal itself.
#[must_use = "dropping a Subscription unregisters the listener"]
pub struct Subscription {
    id: ListenerId,
    registry: std::sync::Weak<Registry>,
}

impl Subscription {
    /// The listener's identifier.
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .listeners
                .lock()
                .retain(|(id, _)| *id != self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_notify_reaches_all_listeners() {
        let signal = MemoryPressure::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h1 = Arc::clone(&hits);
        let _s1 = signal.subscribe(move || {
            h1.fetch_add(1, Ordering::SeqCst);
        });
        let h2 = Arc::clone(&hits);
        let _s2 = signal.subscribe(move || {
            h2.fetch_add(1, Ordering::SeqCst);
        });

        signal.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_dropping_subscription_unregisters() {
        let signal = MemoryPressure::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let sub = signal.subscribe(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(signal.listener_count(), 1);

        drop(sub);
        assert_eq!(signal.listener_count(), 0);

        signal.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_listeners_run_in_registration_order() {
        let signal = MemoryPressure::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let subs: Vec<_> = (0..3)
            .map(|i| {
                let order = Arc::clone(&order);
                signal.subscribe(move || order.lock().push(i))
            })
            .collect();

        signal.notify();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        drop(subs);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let signal = MemoryPressure::new();
        let hits = Arc::new(AtomicUsize::new(0));

        let _bad = signal.subscribe(|| panic!("listener failure"));
        let h = Arc::clone(&hits);
        let _good = signal.subscribe(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        signal.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_outlives_signal() {
        let signal = MemoryPressure::new();
        let sub = signal.subscribe(|| {});
        drop(signal);
        // Registry is gone; dropping the guard must be a no-op.
        drop(sub);
    }

    #[test]
    fn test_clones_share_registry() {
        let signal = MemoryPressure::new();
        let other = signal.clone();
        let hits = Arc::new(AtomicUsize::new(0));

        let h = Arc::clone(&hits);
        let _sub = other.subscribe(move || {
            h.fetch_add(1, Ordering::SeqCst);
        });

        signal.notify();
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
