//! Atoms
//!
//! An atom is an identity-bearing unit of state. Primitive atoms hold a value
//! directly; derived atoms compute theirs from other atoms through a
//! [`Getter`](crate::store::Getter) that records every read as a dependency.
//!
//! Atoms are pure descriptions. Creating one allocates nothing in any store;
//! a store builds its runtime record lazily the first time the atom is read,
//! written or subscribed to, and two stores never share records.
//!
//! # Kinds
//!
//! | Constructor        | Reads                  | Writes                        |
//! |--------------------|------------------------|-------------------------------|
//! | [`atom`]           | own value              | [`SetStateAction`]            |
//! | [`derived`]        | compute function       | read-only                     |
//! | [`derived_async`]  | future                 | read-only                     |
//! | [`writable`]       | compute function       | custom write                  |
//! | [`writable_async`] | future                 | custom write                  |
//! | [`write_only`]     | own value              | custom write                  |

mod action;
mod definition;
mod id;

pub use action::SetStateAction;
pub use definition::{
    atom, derived, derived_async, writable, writable_async, write_only, Atom, OnUnmount,
    PrimitiveAtom, Value, WritableAtom,
};
pub use id::AtomId;

pub(crate) use definition::{
    downcast_result, downcast_value, AnyArgs, AnyResult, AnyValue, AtomDef, Evaluated, Source,
};
