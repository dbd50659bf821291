//! Listener registration.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use super::{Store, StoreInner};
use crate::atom::AtomId;

/// Unique identifier for a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct ListenerId(u64);

impl ListenerId {
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub(crate) fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Callback invoked after a write (or an async settlement) that may have
/// changed the atom it is registered on.
pub(crate) type Listener = Arc<dyn Fn() + Send + Sync>;

/// Guard returned by [`Store::subscribe`].
///
/// Dropping it unsubscribes; when an atom loses its last listener and no
/// mounted atom reads it, the atom unmounts. The guard does not keep the
/// store alive.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<StoreInner>,
    atom: AtomId,
    listener: ListenerId,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(store: &Store, atom: AtomId, listener: ListenerId) -> Self {
        Self {
            store: Arc::downgrade(&store.inner),
            atom,
            listener,
            active: true,
        }
    }

    /// The atom this subscription listens to.
    pub fn atom(&self) -> AtomId {
        self.atom
    }

    /// Remove the listener now.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        if let Some(inner) = self.store.upgrade() {
            Store::from_inner(inner).unsubscribe(self.atom, self.listener);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("atom", &self.atom)
            .field("active", &self.active)
            .finish()
    }
}
