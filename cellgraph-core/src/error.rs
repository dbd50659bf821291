//! Error types for the atom store.
//!
//! Every fallible store operation returns [`AtomError`]. The type is `Clone`
//! because a single async rejection has to reach every caller suspended on
//! the same record.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use crate::atom::AtomId;

/// Errors raised by compute functions, write functions and the store itself.
#[derive(Debug, Clone, thiserror::Error)]
pub enum AtomError {
    /// A compute, write or async function failed.
    #[error("{source}")]
    Failed {
        /// The error raised by user code.
        source: Arc<dyn StdError + Send + Sync>,
    },

    /// `set` was dispatched to an atom without a write function.
    #[error("{atom} is read-only")]
    ReadOnly {
        /// The atom that was written.
        atom: AtomId,
    },

    /// The atom (or one of its dependencies) is waiting on an async result.
    #[error("{atom} is still pending")]
    Pending {
        /// The record whose evaluation is in flight.
        atom: AtomId,
    },

    /// The atom's compute function read the atom itself, directly or
    /// transitively.
    #[error("dependency cycle detected while evaluating {atom}")]
    Cycle {
        /// The atom that was re-entered.
        atom: AtomId,
    },

    /// A stored value did not have the type the caller asked for.
    #[error("value of {atom} has an unexpected type")]
    TypeMismatch {
        /// The atom that was read.
        atom: AtomId,
    },

    /// Arguments passed to a write function had the wrong type.
    #[error("arguments for {atom} have an unexpected type")]
    ArgumentType {
        /// The atom that was written.
        atom: AtomId,
    },

    /// An async atom was evaluated with no tokio runtime to drive it.
    #[error("no async runtime available to drive {atom}")]
    NoRuntime {
        /// The async atom.
        atom: AtomId,
    },

    /// The store backing a handle has been dropped.
    #[error("store has been dropped")]
    StoreDropped,
}

impl AtomError {
    /// Wrap an arbitrary error raised by user code.
    pub fn failed<E>(error: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        Self::Failed {
            source: Arc::new(error),
        }
    }

    /// Build a failure from a plain message.
    pub fn msg(message: impl Into<String>) -> Self {
        Self::failed(Message(message.into()))
    }

    /// Returns true if the error only means "not resolved yet".
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending { .. })
    }
}

/// A string-only error used by [`AtomError::msg`].
#[derive(Debug)]
struct Message(String);

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl StdError for Message {}
