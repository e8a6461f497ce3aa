use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::types::Session;

pub(crate) type Listener = Arc<dyn Fn(&Session) + Send + Sync>;

/// Registered session listeners, in subscription order.
#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Listener)>>,
}

impl ListenerRegistry {
    pub(crate) fn insert(&self, listener: Listener) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries.lock().push((id, listener));
        id
    }

    pub(crate) fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }

    pub(crate) fn clear(&self) {
        self.entries.lock().clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.lock().len()
    }

    fn contains(&self, id: u64) -> bool {
        self.entries.lock().iter().any(|(entry_id, _)| *entry_id == id)
    }

    /// Deliver `snapshot` to every listener. Listeners run without the
    /// registry lock held, so they may subscribe or unsubscribe re-entrantly.
    pub(crate) fn notify(&self, snapshot: &Session) {
        let listeners: Vec<(u64, Listener)> = self.entries.lock().clone();
        for (id, listener) in listeners {
            // Unsubscribed by an earlier listener in this round.
            if !self.contains(id) {
                continue;
            }
            invoke(id, &listener, snapshot);
        }
    }
}

/// Run one listener, containing any panic.
pub(crate) fn invoke(id: u64, listener: &Listener, snapshot: &Session) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(snapshot))) {
        let message = panic
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| panic.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_owned());
        tracing::error!(listener_id = id, panic = %message, "Session listener panicked");
    }
}

/// Handle for one session listener.
///
/// Dropping the handle (or calling [`unsubscribe`](Subscription::unsubscribe))
/// removes the listener. Use [`detach`](Subscription::detach) to keep it for
/// the controller's lifetime.
#[must_use = "dropping a Subscription removes the listener"]
pub struct Subscription {
    id: u64,
    registry: Weak<ListenerRegistry>,
}

impl Subscription {
    pub(crate) fn new(id: u64, registry: &Arc<ListenerRegistry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    /// Remove the listener now.
    pub fn unsubscribe(self) {
        drop(self);
    }

    /// Keep the listener registered until the controller shuts down.
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn broken_listener(_: &Session) {
        panic!("listener bug");
    }

    fn recorder(log: &Arc<Mutex<Vec<u64>>>, tag: u64) -> Listener {
        let log = Arc::clone(log);
        Arc::new(move |_: &Session| log.lock().push(tag))
    }

    #[test]
    fn notifies_in_insertion_order() {
        let registry = ListenerRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        for tag in 1..=3 {
            registry.insert(recorder(&log, tag));
        }

        registry.notify(&Session::signed_out());
        assert_eq!(*log.lock(), vec![1, 2, 3]);
    }

    #[test]
    fn panicking_listener_does_not_stop_fan_out() {
        let registry = ListenerRegistry::default();
        let log = Arc::new(Mutex::new(Vec::new()));
        registry.insert(recorder(&log, 1));
        registry.insert(Arc::new(broken_listener));
        registry.insert(recorder(&log, 3));

        registry.notify(&Session::signed_out());
        assert_eq!(*log.lock(), vec![1, 3]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn dropping_subscription_removes_listener() {
        let registry = Arc::new(ListenerRegistry::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = registry.insert(recorder(&log, 1));
        let subscription = Subscription::new(id, &registry);

        subscription.unsubscribe();
        registry.notify(&Session::signed_out());
        assert!(log.lock().is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn detached_subscription_stays_registered() {
        let registry = Arc::new(ListenerRegistry::default());
        let log = Arc::new(Mutex::new(Vec::new()));
        let id = registry.insert(recorder(&log, 1));
        Subscription::new(id, &registry).detach();

        registry.notify(&Session::signed_out());
        assert_eq!(*log.lock(), vec![1]);
    }

    #[test]
    fn listener_removed_mid_round_is_skipped() {
        let registry = Arc::new(ListenerRegistry::default());
        let log = Arc::new(Mutex::new(Vec::new()));

        let weak = Arc::downgrade(&registry);
        registry.insert(Arc::new(move |_: &Session| {
            if let Some(r) = weak.upgrade() {
                r.remove(1);
            }
        }));
        registry.insert(recorder(&log, 2));

        registry.notify(&Session::signed_out());
        assert!(log.lock().is_empty());
    }
}
