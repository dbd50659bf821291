//! Runtime Records
//!
//! A record is the per-store bookkeeping for one atom definition: the cached
//! value (or in-flight evaluation), the epoch, the dependency and dependent
//! edges, the listeners and the mount state.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};
use smallvec::SmallVec;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::atom::{AnyValue, AtomDef, AtomId, OnUnmount, Source};
use crate::error::AtomError;
use crate::store::{Listener, ListenerId};

/// A dependency edge as observed during one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Dependency {
    /// The atom that was read.
    pub(crate) atom: AtomId,
    /// Its epoch at the moment it was read.
    pub(crate) epoch: u64,
}

/// Dependency list of one evaluation. Most compute functions read few atoms.
pub(crate) type Dependencies = SmallVec<[Dependency; 4]>;

/// How an async evaluation ended, as seen by suspended readers.
#[derive(Clone)]
pub(crate) enum Settlement {
    /// Still running.
    Pending,
    /// Produced a value that is now cached.
    Resolved(AnyValue),
    /// Failed; the error is cached until the next read retries.
    Failed(AtomError),
    /// A newer evaluation replaced this one. Readers should read again.
    Superseded,
}

/// An outstanding async evaluation.
pub(crate) struct PendingEval {
    pub(crate) generation: u64,
    token: CancellationToken,
    settled: watch::Sender<Settlement>,
}

impl PendingEval {
    pub(crate) fn new(generation: u64, token: CancellationToken) -> Self {
        let (settled, _) = watch::channel(Settlement::Pending);
        Self {
            generation,
            token,
            settled,
        }
    }

    /// Register a reader waiting for this evaluation to settle.
    pub(crate) fn subscribe(&self) -> watch::Receiver<Settlement> {
        self.settled.subscribe()
    }

    /// Cancel the work and wake readers so they pick up the newer evaluation.
    pub(crate) fn supersede(self) {
        self.token.cancel();
        self.settled.send_replace(Settlement::Superseded);
    }

    /// Publish the final outcome to every waiting reader.
    pub(crate) fn settle(self, settlement: Settlement) {
        self.settled.send_replace(settlement);
    }
}

/// The value slot of a record.
pub(crate) enum Slot {
    /// Never evaluated, or the last in-flight evaluation was superseded.
    Empty,
    /// A settled value.
    Ready(AnyValue),
    /// An async evaluation is in flight.
    Pending(PendingEval),
    /// The last async evaluation failed.
    Failed(AtomError),
}

/// Mount state of a record with at least one observer.
#[derive(Default)]
pub(crate) struct Mounted {
    /// Mounted records that list this one as a dependency.
    pub(crate) dependents: HashSet<AtomId>,
    /// Teardown returned by the atom's mount hook.
    pub(crate) teardown: Option<OnUnmount>,
}

/// Per-store runtime state for one atom.
pub(crate) struct Record {
    /// The definition this record belongs to.
    pub(crate) def: Arc<AtomDef>,

    /// Cached value or in-flight evaluation.
    pub(crate) slot: Slot,

    /// Bumped every time the value may have changed.
    pub(crate) epoch: u64,

    /// Set by invalidation; cleared when an evaluation starts.
    pub(crate) stale: bool,

    /// Counts evaluations; identifies which async result is current.
    pub(crate) generation: u64,

    /// Atoms read during the most recent evaluation.
    pub(crate) dependencies: Dependencies,

    /// Atoms whose most recent evaluation read this one.
    pub(crate) dependents: IndexSet<AtomId>,

    /// External callbacks subscribed to this atom, in subscription order.
    pub(crate) listeners: IndexMap<ListenerId, Listener>,

    /// Present while something observes the atom.
    pub(crate) mounted: Option<Mounted>,
}

impl Record {
    /// Create the record for a definition.
    ///
    /// Primitive atoms start with their initial value; derived atoms start
    /// empty so the first read evaluates them.
    pub(crate) fn new(def: Arc<AtomDef>) -> Self {
        let slot = match &def.source {
            Source::Primitive(initial) => Slot::Ready(Arc::clone(initial)),
            Source::Derived(_) => Slot::Empty,
        };
        Self {
            def,
            slot,
            epoch: 0,
            stale: false,
            generation: 0,
            dependencies: Dependencies::new(),
            dependents: IndexSet::new(),
            listeners: IndexMap::new(),
            mounted: None,
        }
    }

    pub(crate) fn id(&self) -> AtomId {
        self.def.id
    }

    pub(crate) fn is_mounted(&self) -> bool {
        self.mounted.is_some()
    }

    /// Mark the record as needing recomputation.
    ///
    /// Bumps the epoch so records that captured the old one see the change,
    /// and supersedes any in-flight async evaluation.
    pub(crate) fn mark_stale(&mut self) {
        self.stale = true;
        self.epoch += 1;
        if matches!(self.slot, Slot::Pending(_)) {
            if let Slot::Pending(pending) = std::mem::replace(&mut self.slot, Slot::Empty) {
                pending.supersede();
            }
        }
    }

    /// Store a freshly computed value.
    ///
    /// Supersedes an in-flight evaluation. Returns true if the value changed.
    pub(crate) fn store_value(&mut self, value: AnyValue) -> bool {
        let changed = match &self.slot {
            Slot::Ready(previous) => !(self.def.eq)(&**previous, &*value),
            _ => true,
        };
        if let Slot::Pending(pending) = std::mem::replace(&mut self.slot, Slot::Ready(value)) {
            pending.supersede();
        }
        if changed {
            self.epoch += 1;
        }
        changed
    }

    /// Replace the slot with a new in-flight evaluation.
    pub(crate) fn begin_pending(&mut self, pending: PendingEval) {
        if let Slot::Pending(previous) = std::mem::replace(&mut self.slot, Slot::Pending(pending)) {
            previous.supersede();
        }
        self.epoch += 1;
    }

    /// Take the in-flight evaluation if it is still the current one.
    pub(crate) fn take_pending(&mut self, generation: u64) -> Option<PendingEval> {
        match &self.slot {
            Slot::Pending(pending) if pending.generation == generation => {
                match std::mem::replace(&mut self.slot, Slot::Empty) {
                    Slot::Pending(pending) => Some(pending),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub(crate) fn is_failed(&self) -> bool {
        matches!(self.slot, Slot::Failed(_))
    }

    /// What a reader sees right now.
    pub(crate) fn outcome(&self) -> Result<AnyValue, AtomError> {
        match &self.slot {
            Slot::Ready(value) => Ok(Arc::clone(value)),
            Slot::Failed(err) => Err(err.clone()),
            Slot::Pending(_) | Slot::Empty => Err(AtomError::Pending { atom: self.id() }),
        }
    }

    /// Add a dependent (a record that reads from this one).
    pub(crate) fn add_dependent(&mut self, atom: AtomId) {
        self.dependents.insert(atom);
    }

    /// Remove a dependent.
    pub(crate) fn remove_dependent(&mut self, atom: AtomId) {
        self.dependents.shift_remove(&atom);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::atom::{atom, derived};

    fn record_for<T>(atom: &crate::atom::Atom<T>) -> Record {
        Record::new(Arc::clone(&atom.def))
    }

    #[test]
    fn primitive_record_starts_ready() {
        let count = atom(3);
        let record = record_for(&count);

        let value = record.outcome().unwrap();
        assert_eq!(value.downcast_ref::<i32>(), Some(&3));
        assert_eq!(record.epoch, 0);
    }

    #[test]
    fn derived_record_starts_empty() {
        let doubled = derived(|_get| Ok(2));
        let record = record_for(&doubled);

        assert!(matches!(record.slot, Slot::Empty));
        assert!(record.outcome().unwrap_err().is_pending());
    }

    #[test]
    fn store_value_bumps_epoch_only_on_change() {
        let doubled = derived(|_get| Ok(2));
        let mut record = record_for(&doubled);

        assert!(record.store_value(Arc::new(2_i32)));
        assert_eq!(record.epoch, 1);

        assert!(!record.store_value(Arc::new(2_i32)));
        assert_eq!(record.epoch, 1);

        assert!(record.store_value(Arc::new(4_i32)));
        assert_eq!(record.epoch, 2);
    }

    #[test]
    fn mark_stale_supersedes_pending() {
        let doubled = derived(|_get| Ok(2));
        let mut record = record_for(&doubled);

        let token = CancellationToken::new();
        let pending = PendingEval::new(1, token.clone());
        let receiver = pending.subscribe();
        record.begin_pending(pending);

        record.mark_stale();

        assert!(record.stale);
        assert!(token.is_cancelled());
        assert!(matches!(record.slot, Slot::Empty));
        assert!(matches!(*receiver.borrow(), Settlement::Superseded));
    }

    #[test]
    fn take_pending_ignores_old_generations() {
        let doubled = derived(|_get| Ok(2));
        let mut record = record_for(&doubled);

        record.begin_pending(PendingEval::new(1, CancellationToken::new()));
        record.begin_pending(PendingEval::new(2, CancellationToken::new()));

        assert!(record.take_pending(1).is_none());
        assert!(record.take_pending(2).is_some());
        assert!(record.take_pending(2).is_none());
    }

    #[test]
    fn dependent_management() {
        let count = atom(0);
        let mut record = record_for(&count);
        let a = AtomId::new();
        let b = AtomId::new();

        record.add_dependent(a);
        record.add_dependent(b);
        record.add_dependent(a);
        assert_eq!(record.dependents.len(), 2);

        record.remove_dependent(a);
        assert!(!record.dependents.contains(&a));
        assert!(record.dependents.contains(&b));
    }
}
