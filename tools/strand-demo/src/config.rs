//! Demo configuration loaded from TOML.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use strand_sync::ThreadConfig;

/// Top-level demo configuration. Every section and field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DemoConfig {
    /// Producer/consumer demo settings.
    pub queue: QueueDemo,
    /// Interruption demo settings.
    pub interrupt: InterruptDemo,
    /// Configuration for the interruption demo's worker.
    pub worker: ThreadConfig,
}

/// Settings for the `queue` subcommand.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueDemo {
    pub capacity: usize,
    pub producers: usize,
    pub consumers: usize,
    pub items_per_producer: u64,
    pub wait_tick_ms: u64,
}

impl Default for QueueDemo {
    fn default() -> Self {
        Self {
            capacity: 4,
            producers: 2,
            consumers: 2,
            items_per_producer: 1_000,
            wait_tick_ms: 1,
        }
    }
}

impl QueueDemo {
    pub fn wait_tick(&self) -> Duration {
        Duration::from_millis(self.wait_tick_ms)
    }
}

/// Settings for the `interrupt` subcommand.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InterruptDemo {
    /// How long the worker waits before it is interrupted.
    pub interrupt_delay_ms: u64,
    pub wait_tick_ms: u64,
}

impl Default for InterruptDemo {
    fn default() -> Self {
        Self {
            interrupt_delay_ms: 100,
            wait_tick_ms: 1,
        }
    }
}

impl DemoConfig {
    /// Load configuration from `path`, or the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("invalid config {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config() {
        let config: DemoConfig = toml::from_str(
            r#"
            [queue]
            capacity = 16

            [worker]
            name = "waiter"
            "#,
        )
        .unwrap();

        assert_eq!(config.queue.capacity, 16);
        assert_eq!(config.queue.producers, 2);
        assert_eq!(config.interrupt.interrupt_delay_ms, 100);
        assert_eq!(config.worker.name.as_deref(), Some("waiter"));
    }

    #[test]
    fn test_missing_path_uses_defaults() {
        let config = DemoConfig::load(None).unwrap();
        assert_eq!(config.queue.items_per_producer, 1_000);
        assert_eq!(config.worker, ThreadConfig::default());
    }
}
