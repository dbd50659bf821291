//! Writes, batching and notification.
//!
//! Every `set` opens a batch level. Primitive values written inside it are
//! staged on the batch rather than on their records, so reads made by the
//! write function see them while the rest of the graph does not. When the
//! outermost level closes successfully the staged values are committed,
//! everything downstream is invalidated, and listeners run in topological
//! order. A failing level discards what it staged and moves no epoch.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

use super::{Listener, ListenerId, Setter, Store, StoreState};
use crate::atom::{AnyArgs, AnyResult, AnyValue, AtomDef, AtomId, Value};
use crate::error::AtomError;
use crate::graph::Slot;

/// A staged value overwritten during the current batch.
struct JournalEntry {
    atom: AtomId,
    /// What was staged before, if anything.
    previous: Option<AnyValue>,
}

/// Write nesting state of one store.
#[derive(Default)]
pub(crate) struct Batch {
    depth: usize,
    /// Uncommitted primitive values, in first-write order.
    staged: IndexMap<AtomId, AnyValue>,
    /// Records whose listeners run on the next flush.
    changed: IndexSet<AtomId>,
    journal: Vec<JournalEntry>,
}

impl Batch {
    /// Open a nested level and return its savepoint.
    fn begin(&mut self) -> usize {
        self.depth += 1;
        self.journal.len()
    }

    pub(crate) fn is_open(&self) -> bool {
        self.depth > 0
    }

    /// The value a write function sees for `atom`, if it staged one.
    pub(crate) fn staged(&self, atom: AtomId) -> Option<AnyValue> {
        self.staged.get(&atom).cloned()
    }

    pub(crate) fn is_staging(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Atoms with an uncommitted value.
    pub(crate) fn staged_atoms(&self) -> impl Iterator<Item = AtomId> + '_ {
        self.staged.keys().copied()
    }
}

/// A listener captured for one flush.
struct Notification {
    atom: AtomId,
    id: ListenerId,
    listener: Listener,
}

impl StoreState {
    /// Stage a new value for an atom that holds its own value.
    pub(crate) fn set_primitive<T: Value>(
        &mut self,
        def: &Arc<AtomDef>,
        value: T,
    ) -> Result<(), AtomError> {
        let atom = def.id;
        let record = self.scheduler.ensure(def);
        let committed = match &record.slot {
            Slot::Ready(committed) if def.is_primitive() => Arc::clone(committed),
            _ => return Err(AtomError::ReadOnly { atom }),
        };
        let current = self.batch.staged(atom).unwrap_or(committed);
        if current.downcast_ref::<T>().is_none() {
            return Err(AtomError::TypeMismatch { atom });
        }

        let value: AnyValue = Arc::new(value);
        if (def.eq)(&*current, &*value) {
            tracing::trace!(atom = %def, "write left value unchanged");
            return Ok(());
        }

        let previous = self.batch.staged.insert(atom, value);
        self.batch.journal.push(JournalEntry { atom, previous });
        if !self.batch.is_open() {
            self.commit_staged();
        }
        Ok(())
    }

    /// Invalidate everything downstream of `source` and queue the lot for
    /// notification.
    pub(crate) fn propagate(&mut self, source: AtomId) {
        let invalidated = self.scheduler.invalidate(source);
        self.batch.changed.insert(source);
        self.batch.changed.extend(invalidated);
    }

    /// Move staged values onto their records.
    fn commit_staged(&mut self) {
        self.batch.journal.clear();
        let staged: Vec<(AtomId, AnyValue)> = self.batch.staged.drain(..).collect();
        for (atom, value) in staged {
            let Some(record) = self.scheduler.record_mut(atom) else {
                continue;
            };
            // Written and then written back within the batch
            if let Slot::Ready(committed) = &record.slot {
                if (record.def.eq)(&**committed, &*value) {
                    continue;
                }
            }
            record.slot = Slot::Ready(value);
            record.epoch += 1;
            self.propagate(atom);
        }
    }

    /// Close one batch level. Returns true if it was the outermost.
    fn finish_write(&mut self, savepoint: usize, succeeded: bool) -> bool {
        if !succeeded {
            self.rollback_to(savepoint);
        }
        self.batch.depth = self.batch.depth.saturating_sub(1);
        if self.batch.is_open() {
            return false;
        }
        self.commit_staged();
        true
    }

    /// Unstage every value journaled after `savepoint`, newest first.
    fn rollback_to(&mut self, savepoint: usize) {
        let entries: Vec<JournalEntry> = self.batch.journal.drain(savepoint..).rev().collect();
        for entry in entries {
            tracing::trace!(atom = %entry.atom, "discarding staged write");
            match entry.previous {
                Some(previous) => {
                    self.batch.staged.insert(entry.atom, previous);
                }
                None => {
                    self.batch.staged.shift_remove(&entry.atom);
                }
            }
        }
    }

    /// Drain the changed set into listeners, dependencies first.
    fn take_notifications(&mut self) -> Vec<Notification> {
        if self.batch.is_open() || self.batch.changed.is_empty() {
            return Vec::new();
        }
        let changed: Vec<AtomId> = self.batch.changed.drain(..).collect();
        let order = self.scheduler.topological_sort(changed);
        let mut notifications = Vec::new();
        for atom in order {
            let Some(record) = self.scheduler.record(atom) else {
                continue;
            };
            notifications.extend(record.listeners.iter().map(|(&id, listener)| Notification {
                atom,
                id,
                listener: Arc::clone(listener),
            }));
        }
        notifications
    }

    /// Records downstream of a staged value.
    pub(crate) fn affected_by_staged(&self) -> HashSet<AtomId> {
        self.scheduler.downstream(self.batch.staged_atoms())
    }

    fn is_listening(&self, atom: AtomId, id: ListenerId) -> bool {
        self.scheduler
            .record(atom)
            .is_some_and(|record| record.listeners.contains_key(&id))
    }
}

impl Store {
    pub(crate) fn write_atom(
        &self,
        def: &Arc<AtomDef>,
        args: AnyArgs,
    ) -> Result<AnyResult, AtomError> {
        let Some(write) = def.write.as_ref() else {
            return Err(AtomError::ReadOnly { atom: def.id });
        };

        let _guard = self.lock();
        let savepoint = self.with_state(|state| {
            state.scheduler.ensure(def);
            state.batch.begin()
        });
        tracing::trace!(store = %self.label(), atom = %def, "writing");

        let result = write(&Setter::new(self, def), args);

        let outermost = self.with_state(|state| state.finish_write(savepoint, result.is_ok()));
        match &result {
            Ok(_) if outermost => self.flush(),
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(
                    store = %self.label(),
                    atom = %def,
                    error = %err,
                    "write failed, staged values discarded"
                );
            }
        }
        result
    }

    /// Notify listeners of everything changed since the last flush.
    ///
    /// Does nothing while a write is still open.
    pub(crate) fn flush(&self) {
        let _guard = self.lock();
        let notifications = self.with_state(StoreState::take_notifications);
        if notifications.is_empty() {
            return;
        }
        tracing::trace!(store = %self.label(), count = notifications.len(), "notifying listeners");
        for Notification { atom, id, listener } in notifications {
            // An earlier listener in this flush may have unsubscribed it
            if self.with_state(|state| state.is_listening(atom, id)) {
                listener();
            }
        }
    }
}
