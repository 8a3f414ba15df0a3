//! Change notification fan-out.
//!
//! Every mutation of the local replica is published here after the replica
//! has been updated. Observers are plain synchronous callbacks; each one is
//! guarded by its own lock so that deregistration can guarantee no callback
//! runs afterwards, even when a notification is already being delivered.

use std::sync::{Arc, Mutex, PoisonError};

use fieldtrack_core::Collection;

use crate::store::Snapshot;

type Callback = Box<dyn Fn(&ChangeEvent) + Send + Sync>;

/// What changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeKind {
    /// A record was added or replaced.
    Upsert { collection: Collection, id: String },
    /// Some fields of a record were updated.
    Patch { collection: Collection, id: String },
    /// A collection was replaced from a remote snapshot.
    Replace { collection: Collection },
    /// The whole replica was (re)loaded.
    Reload,
}

/// A notification delivered to observers.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub kind: ChangeKind,
    /// The replica contents right after the change.
    pub snapshot: Arc<Snapshot>,
}

struct ObserverSlot {
    callback: Mutex<Option<Callback>>,
}

/// Process-wide publish point for replica changes.
#[derive(Clone, Default)]
pub struct ChangeNotifier {
    slots: Arc<Mutex<Vec<Arc<ObserverSlot>>>>,
}

impl std::fmt::Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeNotifier")
            .field("observers", &self.observer_count())
            .finish()
    }
}

impl ChangeNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `observer`. It stays registered until the returned handle is
    /// dropped or [`Subscription::unsubscribe`] is called.
    pub fn subscribe<F>(&self, observer: F) -> Subscription
    where
        F: Fn(&ChangeEvent) + Send + Sync + 'static,
    {
        let slot = Arc::new(ObserverSlot {
            callback: Mutex::new(Some(Box::new(observer))),
        });
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::clone(&slot));

        Subscription {
            slot,
            slots: Arc::clone(&self.slots),
        }
    }

    /// Deliver `event` to every registered observer.
    pub fn notify(&self, event: &ChangeEvent) {
        // Snapshot the list so observers may subscribe from inside a callback.
        let slots: Vec<Arc<ObserverSlot>> = self
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for slot in slots {
            let callback = slot
                .callback
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Some(callback) = callback.as_ref() {
                callback(event);
            }
        }
    }

    /// Number of live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

/// Deregistration handle returned by [`ChangeNotifier::subscribe`].
///
/// Dropping the handle deregisters the observer. Once `unsubscribe` (or the
/// drop) returns, the callback will not be invoked again. The handle must not
/// be dropped from inside its own callback; that would deadlock.
#[must_use = "dropping the subscription deregisters the observer"]
pub struct Subscription {
    slot: Arc<ObserverSlot>,
    slots: Arc<Mutex<Vec<Arc<ObserverSlot>>>>,
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").finish_non_exhaustive()
    }
}

impl Subscription {
    /// Deregister the observer.
    pub fn unsubscribe(self) {
        drop(self);
    }

    fn detach(&self) {
        // Waits for an in-flight delivery to this observer to finish.
        self.slot
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|s| !Arc::ptr_eq(s, &self.slot));
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}
