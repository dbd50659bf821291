//! Cellgraph Core
//!
//! This crate provides the core runtime for Cellgraph, a fine-grained
//! reactive state store built from atoms. It implements:
//!
//! - Atom definitions (primitive, derived, async and writable atoms)
//! - Isolated stores holding per-atom values, keyed by atom identity
//! - Automatic dependency tracking with lazy, epoch-checked recomputation
//! - Batched change notification in dependency order
//! - Async atoms with supersession and cancellation
//! - Mount and unmount hooks driven by subscriptions
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `atom`: Immutable atom definitions and their typed handles
//! - `graph`: Per-store runtime records and the invalidation scheduler
//! - `store`: The store API, evaluation contexts and async coordination
//! - `error`: The error type shared by every fallible operation
//!
//! # Example
//!
//! ```rust
//! use std::sync::atomic::{AtomicI32, Ordering};
//! use std::sync::Arc;
//!
//! use cellgraph_core::{atom, derived, Store};
//!
//! let store = Store::new();
//!
//! // A primitive atom holds a value
//! let count = atom(1);
//!
//! // A derived atom computes from other atoms
//! let doubled = {
//!     let count = count.clone();
//!     derived(move |get| Ok(get.get(&count)? * 2))
//! };
//!
//! // Listeners hear about every change that may affect the atom
//! let calls = Arc::new(AtomicI32::new(0));
//! let _subscription = {
//!     let calls = calls.clone();
//!     store.subscribe(&doubled, move || {
//!         calls.fetch_add(1, Ordering::SeqCst);
//!     })
//! };
//!
//! store.set(&count, 5).unwrap();
//! assert_eq!(store.get(&doubled).unwrap(), 10);
//! assert_eq!(calls.load(Ordering::SeqCst), 1);
//! ```

pub mod atom;
pub mod error;
mod graph;
pub mod store;

pub use atom::{
    atom, derived, derived_async, writable, writable_async, write_only, Atom, AtomId, OnUnmount,
    PrimitiveAtom, SetStateAction, Value, WritableAtom,
};
pub use error::AtomError;
pub use store::{
    create_store, default_store, store_or_default, AtomSnapshot, AtomState, Getter, Loadable,
    ReadOptions, SetAtom, Setter, Store, StoreConfig, StoreSnapshot, Subscription,
};
