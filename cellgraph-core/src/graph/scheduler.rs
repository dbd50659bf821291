//! Update Scheduler
//!
//! The scheduler owns the record arena of one store and decides what a write
//! invalidates and in which order listeners hear about it.
//!
//! # Algorithm
//!
//! 1. When a record changes, walk its dependents breadth-first and mark each
//!    one stale, bumping its epoch. Nothing is recomputed here; derived atoms
//!    recompute when they are next read.
//! 2. Collect the changed record and everything it invalidated.
//! 3. Sort them topologically (dependencies before dependents) so listeners
//!    on a derived atom fire after listeners on the atoms it reads.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use super::record::{Dependencies, Record, Slot};
use crate::atom::{AtomDef, AtomId};

/// Edges gained and lost by one re-evaluation.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct EdgeDelta {
    pub(crate) added: Vec<AtomId>,
    pub(crate) removed: Vec<AtomId>,
}

/// The record arena plus the invalidation and ordering logic over it.
#[derive(Default)]
pub(crate) struct UpdateScheduler {
    /// All records, indexed by atom ID.
    records: HashMap<AtomId, Record>,
}

impl UpdateScheduler {
    /// Create a new empty scheduler.
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Get the record for a definition, creating it on first access.
    pub(crate) fn ensure(&mut self, def: &Arc<AtomDef>) -> &mut Record {
        self.records
            .entry(def.id)
            .or_insert_with(|| Record::new(Arc::clone(def)))
    }

    /// Get a reference to a record.
    pub(crate) fn record(&self, id: AtomId) -> Option<&Record> {
        self.records.get(&id)
    }

    /// Get a mutable reference to a record.
    pub(crate) fn record_mut(&mut self, id: AtomId) -> Option<&mut Record> {
        self.records.get_mut(&id)
    }

    /// Iterate over all records.
    pub(crate) fn records(&self) -> impl Iterator<Item = &Record> {
        self.records.values()
    }

    /// Returns true if the record can be served from cache.
    ///
    /// Primitive records always can. A derived record can if it holds a
    /// settled outcome (or an in-flight evaluation), was not invalidated, and
    /// every dependency still has the epoch captured when it was read.
    pub(crate) fn is_fresh(&self, id: AtomId) -> bool {
        let Some(record) = self.records.get(&id) else {
            return false;
        };
        if record.def.is_primitive() {
            return true;
        }
        if record.stale {
            return false;
        }
        if matches!(record.slot, Slot::Empty) {
            return false;
        }
        record.dependencies.iter().all(|dependency| {
            self.records
                .get(&dependency.atom)
                .is_some_and(|dep| dep.epoch == dependency.epoch)
        })
    }

    /// Replace a record's dependencies with the set observed by its latest
    /// evaluation and update the reverse edges.
    pub(crate) fn replace_dependencies(
        &mut self,
        id: AtomId,
        dependencies: Dependencies,
    ) -> EdgeDelta {
        let Some(record) = self.records.get_mut(&id) else {
            return EdgeDelta::default();
        };
        let previous = std::mem::replace(&mut record.dependencies, dependencies);
        let current: Vec<AtomId> = record.dependencies.iter().map(|d| d.atom).collect();

        let removed: Vec<AtomId> = previous
            .iter()
            .map(|d| d.atom)
            .filter(|atom| !current.contains(atom))
            .collect();
        let added: Vec<AtomId> = current
            .iter()
            .copied()
            .filter(|atom| !previous.iter().any(|d| d.atom == *atom))
            .collect();

        for dep_id in &removed {
            if let Some(dep) = self.records.get_mut(dep_id) {
                dep.remove_dependent(id);
            }
        }
        for dep_id in &current {
            if let Some(dep) = self.records.get_mut(dep_id) {
                dep.add_dependent(id);
            }
        }

        EdgeDelta { added, removed }
    }

    /// Mark everything downstream of `source` stale.
    ///
    /// Returns the invalidated records in breadth-first order. The source
    /// itself is not included.
    pub(crate) fn invalidate(&mut self, source: AtomId) -> Vec<AtomId> {
        let mut invalidated = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        // Start with the source's direct dependents
        if let Some(source) = self.records.get(&source) {
            queue.extend(source.dependents.iter().copied());
        }

        // BFS to propagate staleness
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }

            if let Some(record) = self.records.get_mut(&id) {
                record.mark_stale();
                invalidated.push(id);
                queue.extend(record.dependents.iter().copied());
            }
        }

        invalidated
    }

    /// Records reachable from `sources` through dependent edges, sources
    /// excluded. Nothing is marked.
    pub(crate) fn downstream(
        &self,
        sources: impl IntoIterator<Item = AtomId>,
    ) -> HashSet<AtomId> {
        let mut reached = HashSet::new();
        let mut queue: VecDeque<AtomId> = VecDeque::new();
        for source in sources {
            if let Some(record) = self.records.get(&source) {
                queue.extend(record.dependents.iter().copied());
            }
        }
        while let Some(id) = queue.pop_front() {
            if !reached.insert(id) {
                continue;
            }
            if let Some(record) = self.records.get(&id) {
                queue.extend(record.dependents.iter().copied());
            }
        }
        reached
    }

    /// Perform a topological sort of the given records.
    ///
    /// Returns records in order such that dependencies come before dependents.
    /// Records caught in a dependency loop cannot be ordered; they follow the
    /// rest in the order they were given.
    pub(crate) fn topological_sort(&self, ids: Vec<AtomId>) -> Vec<AtomId> {
        let id_set: HashSet<_> = ids.iter().copied().collect();
        let mut in_degree: HashMap<AtomId, usize> = HashMap::new();
        let mut result = Vec::with_capacity(ids.len());
        let mut queue = VecDeque::new();

        // Calculate in-degrees (only counting edges within the set)
        for &id in &ids {
            if let Some(record) = self.records.get(&id) {
                let degree = record
                    .dependencies
                    .iter()
                    .filter(|d| d.atom != id && id_set.contains(&d.atom))
                    .count();
                in_degree.insert(id, degree);
                if degree == 0 {
                    queue.push_back(id);
                }
            }
        }

        // Kahn's algorithm
        while let Some(id) = queue.pop_front() {
            result.push(id);

            if let Some(record) = self.records.get(&id) {
                for &dependent_id in &record.dependents {
                    if let Some(degree) = in_degree.get_mut(&dependent_id) {
                        *degree = degree.saturating_sub(1);
                        if *degree == 0 {
                            queue.push_back(dependent_id);
                        }
                    }
                }
            }
        }

        if result.len() < in_degree.len() {
            let ordered: HashSet<AtomId> = result.iter().copied().collect();
            let looped: Vec<AtomId> = ids
                .iter()
                .copied()
                .filter(|id| in_degree.contains_key(id) && !ordered.contains(id))
                .collect();
            tracing::debug!(count = looped.len(), "records in a dependency loop notified last");
            result.extend(looped);
        }

        result
    }

    /// Get the total number of records.
    pub(crate) fn record_count(&self) -> usize {
        self.records.len()
    }
}
