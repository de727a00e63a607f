//! Thread configuration.

use serde::{Deserialize, Serialize};

/// Prefix for workers spawned without an explicit name.
pub const DEFAULT_NAME_PREFIX: &str = "strand-worker";

/// Configuration applied when a managed thread spawns its worker.
///
/// Can be embedded in a larger TOML or JSON configuration; missing fields fall
/// back to their defaults.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreadConfig {
    /// Worker thread name. Defaults to `strand-worker-{id}`.
    pub name: Option<String>,
    /// Worker stack size in bytes. Defaults to the platform default.
    pub stack_size: Option<usize>,
}

impl ThreadConfig {
    /// Set the worker thread name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the worker stack size in bytes.
    #[must_use]
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// Build a `std::thread::Builder` for the worker with the given id.
    pub(crate) fn builder(&self, id: u64) -> std::thread::Builder {
        let name = self
            .name
            .clone()
            .unwrap_or_else(|| format!("{DEFAULT_NAME_PREFIX}-{id}"));
        let builder = std::thread::Builder::new().name(name);
        match self.stack_size {
            Some(size) => builder.stack_size(size),
            None => builder,
        }
    }
}
