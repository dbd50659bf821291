//! Atom identity.
//!
//! Definitions never compare structurally. Each one receives a stable integer
//! handle when it is created, and that handle keys the per-store arena of
//! runtime records.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Unique identifier for an atom definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AtomId(u64);

impl AtomId {
    /// Generate a new unique atom ID.
    ///
    /// Uses an atomic counter so IDs stay unique across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for AtomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AtomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "atom{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atom_ids_are_unique() {
        let id1 = AtomId::new();
        let id2 = AtomId::new();
        let id3 = AtomId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn atom_ids_display_as_keys() {
        let id = AtomId::new();
        assert_eq!(id.to_string(), format!("atom{}", id.raw()));
    }
}
