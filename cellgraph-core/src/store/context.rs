//! Evaluation Contexts
//!
//! Compute and write functions never reach the store ambiently. They receive
//! explicit capabilities instead:
//!
//! - [`Getter`] is handed to compute functions. Every read through it is
//!   recorded as a dependency of the atom being evaluated, at the epoch the
//!   dependency had when it was read.
//! - [`Setter`] is handed to write functions. Reads through it are untracked,
//!   writes are batched into the enclosing outer `set`.
//! - [`ReadOptions`] carries the per-evaluation cancellation token and a
//!   self-setter for writable atoms.
//!
//! Because the context is a value rather than thread-local state, several
//! stores can evaluate at once without cross-talk.

use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use tokio_util::sync::CancellationToken;

use super::{Store, StoreInner};
use crate::atom::{downcast_result, downcast_value, Atom, AtomDef, AtomId, Value, WritableAtom};
use crate::error::AtomError;
use crate::graph::{Dependencies, Dependency};

/// Read capability passed to compute functions.
///
/// Collects the dependencies of one evaluation.
pub struct Getter<'a> {
    store: &'a Store,
    atom: AtomId,
    dependencies: Dependencies,
}

impl<'a> Getter<'a> {
    pub(crate) fn new(store: &'a Store, atom: AtomId) -> Self {
        Self {
            store,
            atom,
            dependencies: Dependencies::new(),
        }
    }

    /// The atom being evaluated.
    pub fn atom(&self) -> AtomId {
        self.atom
    }

    /// Read an atom and record it as a dependency.
    ///
    /// The dependency is recorded even when the read fails, so the caller is
    /// invalidated once the dependency recovers. A read that closes a cycle
    /// is not recorded; the graph stays acyclic.
    pub fn get<T: Value>(&mut self, atom: &Atom<T>) -> Result<T, AtomError> {
        let (outcome, epoch) = self.store.read_atom(&atom.def);
        let closes_cycle = matches!(
            &outcome,
            Err(AtomError::Cycle { atom: looped }) if *looped == atom.id()
        );
        if !closes_cycle {
            self.track(atom.id(), epoch);
        }
        outcome.and_then(|value| downcast_value(atom.id(), &value))
    }

    /// Record a read. Repeated reads collapse to one edge at the latest epoch.
    fn track(&mut self, atom: AtomId, epoch: u64) {
        if atom == self.atom {
            return;
        }
        match self.dependencies.iter_mut().find(|d| d.atom == atom) {
            Some(existing) => existing.epoch = epoch,
            None => self.dependencies.push(Dependency { atom, epoch }),
        }
    }

    pub(crate) fn into_dependencies(self) -> Dependencies {
        self.dependencies
    }
}

/// Write capability passed to write functions.
pub struct Setter<'a> {
    store: &'a Store,
    def: &'a Arc<AtomDef>,
}

impl<'a> Setter<'a> {
    pub(crate) fn new(store: &'a Store, def: &'a Arc<AtomDef>) -> Self {
        Self { store, def }
    }

    /// The atom whose write function is running.
    pub fn atom(&self) -> AtomId {
        self.def.id
    }

    /// Read an atom without recording a dependency.
    pub fn get<T: Value>(&self, atom: &Atom<T>) -> Result<T, AtomError> {
        self.store.get(atom)
    }

    /// Dispatch a write to another atom (or to this one).
    ///
    /// Listeners are notified once, after the outermost write returns.
    pub fn set<T, A, R>(
        &self,
        atom: &WritableAtom<T, A, R>,
        args: impl Into<A>,
    ) -> Result<R, AtomError>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        self.store.set(atom, args)
    }

    /// Read the value held by the atom being written.
    pub fn self_value<T: Value>(&self) -> Result<T, AtomError> {
        let (outcome, _) = self.store.read_atom(self.def);
        outcome.and_then(|value| downcast_value(self.def.id, &value))
    }

    /// Replace the value held by the atom being written.
    ///
    /// Only atoms that hold their own value (primitive and write-only atoms)
    /// accept this; derived atoms raise [`AtomError::ReadOnly`].
    pub fn set_self_value<T: Value>(&self, value: T) -> Result<(), AtomError> {
        self.store.with_state(|state| state.set_primitive(self.def, value))
    }
}

/// Per-evaluation options passed to compute functions.
pub struct ReadOptions {
    signal: CancellationToken,
    set_self: SetSelf,
}

impl ReadOptions {
    pub(crate) fn new(signal: CancellationToken, set_self: SetSelf) -> Self {
        Self { signal, set_self }
    }

    /// Cancelled when this evaluation is superseded.
    ///
    /// Async work should watch it and stop early; the store discards a
    /// superseded result whether or not the work stops.
    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    /// A setter that dispatches to this atom's own write function.
    ///
    /// Meant to be called later (for example from async work), not during the
    /// evaluation itself. On a read-only atom the setter raises
    /// [`AtomError::ReadOnly`].
    pub fn set_self<A, R>(&self) -> SetAtom<A, R>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        SetAtom::new(self.set_self.clone())
    }
}

/// Untyped handle that writes to one atom of one store.
#[derive(Clone)]
pub(crate) struct SetSelf {
    store: Weak<StoreInner>,
    def: Arc<AtomDef>,
}

impl SetSelf {
    pub(crate) fn new(store: &Store, def: &Arc<AtomDef>) -> Self {
        Self {
            store: Arc::downgrade(&store.inner),
            def: Arc::clone(def),
        }
    }

    fn set<A, R>(&self, args: A) -> Result<R, AtomError>
    where
        A: Send + 'static,
        R: Send + 'static,
    {
        let store = self
            .store
            .upgrade()
            .map(Store::from_inner)
            .ok_or(AtomError::StoreDropped)?;
        let result = store.write_atom(&self.def, Box::new(args))?;
        downcast_result(self.def.id, result)
    }
}

/// Typed setter bound to one atom of one store.
///
/// Handed to mount hooks and returned by [`ReadOptions::set_self`]. Holds the
/// store weakly; calling it after the store is dropped raises
/// [`AtomError::StoreDropped`].
pub struct SetAtom<A, R = ()> {
    inner: SetSelf,
    _marker: PhantomData<fn(A) -> R>,
}

impl<A, R> SetAtom<A, R>
where
    A: Send + 'static,
    R: Send + 'static,
{
    pub(crate) fn new(inner: SetSelf) -> Self {
        Self {
            inner,
            _marker: PhantomData,
        }
    }

    /// The atom this setter writes to.
    pub fn atom(&self) -> AtomId {
        self.inner.def.id
    }

    /// Run the atom's write function with `args`.
    pub fn call(&self, args: impl Into<A>) -> Result<R, AtomError> {
        self.inner.set(args.into())
    }
}

impl<A, R> Clone for SetAtom<A, R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            _marker: PhantomData,
        }
    }
}

impl<A, R> std::fmt::Debug for SetAtom<A, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetAtom").field("atom", &self.inner.def.id).finish()
    }
}
