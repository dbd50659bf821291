//! Serializable snapshots of a store's graph, for debugging tools.

use serde::Serialize;

use super::Store;
use crate::atom::AtomId;
use crate::graph::{Record, Slot};

/// Coarse state of a record's value slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AtomState {
    /// Never evaluated, or its last async evaluation was superseded.
    Empty,
    /// Holds a value.
    Ready,
    /// An async evaluation is in flight.
    Pending,
    /// The last async evaluation failed.
    Failed,
}

/// One record of a [`StoreSnapshot`].
#[derive(Debug, Clone, Serialize)]
pub struct AtomSnapshot {
    pub id: AtomId,
    /// Debug label, if one was set.
    pub label: Option<String>,
    /// Bumped every time the value may have changed.
    pub epoch: u64,
    pub state: AtomState,
    /// Invalidated and waiting for the next read to recompute.
    pub stale: bool,
    /// Atoms read by the most recent evaluation.
    pub dependencies: Vec<AtomId>,
    /// Atoms whose most recent evaluation read this one.
    pub dependents: Vec<AtomId>,
    /// Number of subscribed listeners.
    pub listeners: usize,
    /// Whether something observes the atom, directly or through a dependent.
    pub mounted: bool,
}

impl AtomSnapshot {
    fn capture(record: &Record) -> Self {
        let state = match record.slot {
            Slot::Empty => AtomState::Empty,
            Slot::Ready(_) => AtomState::Ready,
            Slot::Pending(_) => AtomState::Pending,
            Slot::Failed(_) => AtomState::Failed,
        };
        Self {
            id: record.id(),
            label: record.def.label().map(str::to_owned),
            epoch: record.epoch,
            state,
            stale: record.stale,
            dependencies: record.dependencies.iter().map(|d| d.atom).collect(),
            dependents: record.dependents.iter().copied().collect(),
            listeners: record.listeners.len(),
            mounted: record.is_mounted(),
        }
    }
}

/// Point-in-time view of every record in a store, ordered by atom ID.
///
/// Values themselves are not captured; atoms hold arbitrary types.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    /// Label of the store the snapshot was taken from.
    pub label: String,
    /// One entry per record, sorted by ID.
    pub atoms: Vec<AtomSnapshot>,
}

impl StoreSnapshot {
    /// Look up one record.
    pub fn atom(&self, id: AtomId) -> Option<&AtomSnapshot> {
        self.atoms
            .binary_search_by_key(&id, |atom| atom.id)
            .ok()
            .map(|index| &self.atoms[index])
    }

    /// Render as pretty-printed JSON.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl Store {
    /// Capture the current graph.
    pub fn snapshot(&self) -> StoreSnapshot {
        let mut atoms: Vec<AtomSnapshot> = self.with_state(|state| {
            state
                .scheduler
                .records()
                .map(AtomSnapshot::capture)
                .collect()
        });
        atoms.sort_by_key(|atom| atom.id);
        StoreSnapshot {
            label: self.label().to_owned(),
            atoms,
        }
    }
}
