//! Store configuration.

use serde::Deserialize;
use tokio::runtime::Handle;

/// Options for [`Store::with_config`](super::Store::with_config).
///
/// The label can be loaded from a host's own config file; the runtime handle
/// can only be set in code.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Name used in logs and snapshots.
    pub label: Option<String>,

    /// Runtime that drives async atoms. Falls back to the runtime the
    /// evaluation happens on.
    #[serde(skip)]
    pub runtime: Option<Handle>,
}

impl StoreConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}
