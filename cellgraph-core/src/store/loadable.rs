//! Non-suspending view of an atom's state.

use super::Store;
use crate::atom::{downcast_value, Atom, Value};
use crate::error::AtomError;

/// State of an atom as seen by code that cannot wait, such as a render pass.
#[derive(Debug, Clone)]
pub enum Loadable<T> {
    /// An async evaluation (its own or a dependency's) is in flight.
    Loading,
    /// The value is available.
    Ready(T),
    /// Evaluation failed.
    Failed(AtomError),
}

impl<T> Loadable<T> {
    /// Returns true while an async evaluation is in flight.
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    /// The value, if ready.
    pub fn ready(self) -> Option<T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }
}

impl Store {
    /// Read an atom without waiting and without retrying a failed async
    /// evaluation.
    pub fn loadable<T: Value>(&self, atom: &Atom<T>) -> Loadable<T> {
        let (outcome, _) = self.read_atom(&atom.def);
        match outcome.and_then(|value| downcast_value(atom.id(), &value)) {
            Ok(value) => Loadable::Ready(value),
            Err(err) if err.is_pending() => Loadable::Loading,
            Err(err) => Loadable::Failed(err),
        }
    }
}
