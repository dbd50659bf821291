//! Dependency Graph
//!
//! This module holds the per-store runtime side of the atom graph: one
//! [`Record`] per atom definition, and the [`UpdateScheduler`] that owns them.
//!
//! # Overview
//!
//! The graph is a directed acyclic graph where:
//!
//! - Nodes are runtime records, keyed by the atom's stable [`AtomId`]
//! - Edges are read dependencies: if A's compute function read B during its
//!   latest evaluation, B lists A as a dependent and A lists B (with the
//!   epoch B had at the time) as a dependency
//!
//! Edges are discovered at evaluation time and replaced wholesale by every
//! evaluation, so branches a compute function stops taking stop causing
//! invalidation.
//!
//! [`AtomId`]: crate::atom::AtomId

mod record;
mod scheduler;

pub(crate) use record::{Dependencies, Dependency, Mounted, PendingEval, Record, Settlement, Slot};
pub(crate) use scheduler::{EdgeDelta, UpdateScheduler};
