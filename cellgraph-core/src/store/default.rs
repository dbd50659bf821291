//! The process-wide default store.
//!
//! Lazily created on first use and never torn down. Code that is handed no
//! explicit store falls back to it.

use std::sync::OnceLock;

use super::{Store, StoreConfig};

static DEFAULT_STORE: OnceLock<Store> = OnceLock::new();

/// The shared default store. Every call returns a handle to the same store.
pub fn default_store() -> Store {
    DEFAULT_STORE
        .get_or_init(|| Store::with_config(StoreConfig::new().with_label("default")))
        .clone()
}

/// The given store, or the default store when none is given.
pub fn store_or_default(store: Option<&Store>) -> Store {
    store.cloned().unwrap_or_else(default_store)
}
