//! Store
//!
//! A store owns the runtime records for every atom it has touched. Atoms are
//! shared definitions; stores are isolated worlds of values. Reading the same
//! atom through two stores yields two independent records.
//!
//! # How It Works
//!
//! 1. `get` evaluates an atom lazily. A cached value is returned while the
//!    record is fresh; otherwise the compute function runs under a
//!    [`Getter`] that records which atoms it read.
//!
//! 2. `set` runs the atom's write function inside a batch. Every primitive
//!    value it changes invalidates the records downstream of it.
//!
//! 3. When the outermost write returns successfully, listeners on every
//!    changed record are notified in dependency order.
//!
//! 4. Async atoms hand back a future. The store drives it on a tokio runtime
//!    and treats the result as an ordinary value change once it settles.
//!
//! # Thread Safety
//!
//! All graph operations of one store are serialized behind a reentrant lock.
//! Compute, write, mount and listener callbacks may call back into the same
//! store on the same thread; other threads wait. Only [`Store::get_async`]
//! suspends, and it never holds the lock across an await point.

mod config;
mod context;
mod default;
mod loadable;
mod mount;
mod pending;
mod read;
mod snapshot;
mod subscription;
mod write;

use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::{ReentrantMutex, ReentrantMutexGuard};

use crate::atom::{
    downcast_result, downcast_value, Atom, AtomId, PrimitiveAtom, SetStateAction, Value,
    WritableAtom,
};
use crate::error::AtomError;
use crate::graph::UpdateScheduler;

pub use config::StoreConfig;
pub use context::{Getter, ReadOptions, SetAtom, Setter};
pub use default::{default_store, store_or_default};
pub use loadable::Loadable;
pub use snapshot::{AtomSnapshot, AtomState, StoreSnapshot};
pub use subscription::Subscription;

pub(crate) use context::SetSelf;
pub(crate) use subscription::{Listener, ListenerId};

use write::Batch;

/// Mutable state of one store. Only touched through [`Store::with_state`].
#[derive(Default)]
pub(crate) struct StoreState {
    pub(crate) scheduler: UpdateScheduler,
    /// Records whose compute function is currently running.
    pub(crate) evaluating: HashSet<AtomId>,
    pub(crate) batch: Batch,
}

pub(crate) struct StoreInner {
    config: StoreConfig,
    state: ReentrantMutex<RefCell<StoreState>>,
}

/// An isolated container of atom values.
///
/// Cloning a store is cheap; clones share the same records.
#[derive(Clone)]
pub struct Store {
    pub(crate) inner: Arc<StoreInner>,
}

impl Store {
    /// Create an empty store with the default configuration.
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    /// Create an empty store.
    pub fn with_config(config: StoreConfig) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                config,
                state: ReentrantMutex::new(RefCell::new(StoreState::default())),
            }),
        }
    }

    pub(crate) fn from_inner(inner: Arc<StoreInner>) -> Self {
        Self { inner }
    }

    /// The configured label, or `"store"`.
    pub fn label(&self) -> &str {
        self.inner.config.label.as_deref().unwrap_or("store")
    }

    /// Returns true if both handles refer to the same store.
    pub fn ptr_eq(&self, other: &Store) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Hold the store lock for the duration of an outer operation.
    pub(crate) fn lock(&self) -> ReentrantMutexGuard<'_, RefCell<StoreState>> {
        self.inner.state.lock()
    }

    /// Borrow the state briefly. `f` must not call user code.
    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut StoreState) -> R) -> R {
        let guard = self.lock();
        let mut state = guard.borrow_mut();
        f(&mut state)
    }

    /// Read an atom's current value.
    ///
    /// Evaluates the atom if it was never read or something it depends on
    /// changed. Fails with [`AtomError::Pending`] while an async evaluation is
    /// in flight; use [`Store::get_async`] to wait for it instead.
    pub fn get<T: Value>(&self, atom: &Atom<T>) -> Result<T, AtomError> {
        let (outcome, _) = self.read_root(&atom.def);
        outcome.and_then(|value| downcast_value(atom.id(), &value))
    }

    /// Write to an atom through its write function.
    ///
    /// Listeners on everything the write changed are notified after it
    /// returns. If it fails, every value it changed is restored and no
    /// listener fires.
    pub fn set<T, A, R>(
        &self,
        atom: &WritableAtom<T, A, R>,
        args: impl Into<A>,
    ) -> Result<R, AtomError>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let result = self.write_atom(&atom.def, Box::new(args.into()))?;
        downcast_result(atom.id(), result)
    }

    /// Replace a primitive atom's value with `f(current)`.
    pub fn update<T, F>(&self, atom: &PrimitiveAtom<T>, f: F) -> Result<(), AtomError>
    where
        T: Value,
        F: FnOnce(&T) -> T + Send + 'static,
    {
        self.set(atom, SetStateAction::update(f))
    }

    /// Register a listener called whenever the atom's value may have changed.
    ///
    /// Subscribing mounts the atom (and, transitively, everything it reads).
    /// Dropping the returned [`Subscription`] unsubscribes.
    pub fn subscribe<T, F>(&self, atom: &Atom<T>, listener: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        let _guard = self.lock();
        let id = ListenerId::new();
        let listener: Listener = Arc::new(listener);
        self.with_state(|state| {
            state.scheduler.ensure(&atom.def).listeners.insert(id, listener);
        });
        tracing::trace!(store = %self.label(), atom = %atom.def, "subscribed");
        self.mount(&atom.def);
        Subscription::new(self, atom.id(), id)
    }

    pub(crate) fn unsubscribe(&self, atom: AtomId, listener: ListenerId) {
        let _guard = self.lock();
        let removed = self.with_state(|state| {
            state
                .scheduler
                .record_mut(atom)
                .and_then(|record| record.listeners.shift_remove(&listener))
        });
        // Dropped outside the borrow: the closure may own other subscriptions
        if removed.is_none() {
            return;
        }
        drop(removed);
        tracing::trace!(store = %self.label(), %atom, "unsubscribed");
        self.maybe_unmount(atom);
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let records = self.with_state(|state| state.scheduler.record_count());
        f.debug_struct("Store")
            .field("label", &self.label())
            .field("records", &records)
            .finish()
    }
}

/// Create a new, empty store.
pub fn create_store() -> Store {
    Store::new()
}
