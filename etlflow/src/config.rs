//! Configuration types for blocks and the runner.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Per-block execution options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockOptions {
    /// Number of records per batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of distinct batch failures tolerated before the block halts.
    #[serde(default = "default_max_exceptions")]
    pub max_exceptions: usize,
    /// Concurrent workers for load blocks.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Number of batches buffered between two linked blocks.
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
}

fn default_batch_size() -> usize {
    1000
}

fn default_max_exceptions() -> usize {
    3
}

fn default_workers() -> usize {
    1
}

fn default_channel_capacity() -> usize {
    4
}

impl Default for BlockOptions {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_exceptions: default_max_exceptions(),
            workers: default_workers(),
            channel_capacity: default_channel_capacity(),
        }
    }
}

impl BlockOptions {
    /// Creates options with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the batch size. Zero is treated as one.
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Sets the error budget.
    #[must_use]
    pub fn with_max_exceptions(mut self, max_exceptions: usize) -> Self {
        self.max_exceptions = max_exceptions.max(1);
        self
    }

    /// Sets the worker count. Zero is treated as one.
    #[must_use]
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Sets the channel capacity between blocks.
    #[must_use]
    pub fn with_channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity.max(1);
        self
    }
}

/// Runner-wide configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Cluster assigned to containers that do not name one.
    #[serde(default = "default_cluster")]
    pub default_cluster: String,
    /// Options applied to blocks that do not override them.
    #[serde(default)]
    pub block_defaults: BlockOptions,
}

/// Name of the cluster used when a container does not declare one.
pub const DEFAULT_CLUSTER: &str = "Default";

fn default_cluster() -> String {
    DEFAULT_CLUSTER.to_string()
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            default_cluster: default_cluster(),
            block_defaults: BlockOptions::default(),
        }
    }
}

impl RunnerConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads overrides from `ETLFLOW_*` environment variables.
    ///
    /// Unparseable values are ignored with a warning.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        if let Some(cluster) = lookup("ETLFLOW_DEFAULT_CLUSTER") {
            if !cluster.trim().is_empty() {
                config.default_cluster = cluster.trim().to_string();
            }
        }
        if let Some(v) = parse_var(&lookup, "ETLFLOW_BATCH_SIZE") {
            config.block_defaults = config.block_defaults.with_batch_size(v);
        }
        if let Some(v) = parse_var(&lookup, "ETLFLOW_MAX_EXCEPTIONS") {
            config.block_defaults = config.block_defaults.with_max_exceptions(v);
        }
        if let Some(v) = parse_var(&lookup, "ETLFLOW_WORKERS") {
            config.block_defaults = config.block_defaults.with_workers(v);
        }

        config
    }

    /// Sets the default cluster name.
    #[must_use]
    pub fn with_default_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.default_cluster = cluster.into();
        self
    }

    /// Sets the default block options.
    #[must_use]
    pub fn with_block_defaults(mut self, options: BlockOptions) -> Self {
        self.block_defaults = options;
        self
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "Ignoring unparseable configuration value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_block_options_defaults() {
        let options = BlockOptions::default();
        assert_eq!(options.batch_size, 1000);
        assert_eq!(options.max_exceptions, 3);
        assert_eq!(options.workers, 1);
    }

    #[test]
    fn test_block_options_clamps_zero() {
        let options = BlockOptions::new().with_batch_size(0).with_workers(0);
        assert_eq!(options.batch_size, 1);
        assert_eq!(options.workers, 1);
    }

    #[test]
    fn test_block_options_deserialize_partial() {
        let options: BlockOptions = serde_json::from_str(r#"{"batch_size": 50}"#).unwrap();
        assert_eq!(options.batch_size, 50);
        assert_eq!(options.max_exceptions, 3);
    }

    #[test]
    fn test_runner_config_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("ETLFLOW_DEFAULT_CLUSTER", "Nightly"),
            ("ETLFLOW_BATCH_SIZE", "250"),
            ("ETLFLOW_WORKERS", "not-a-number"),
        ]
        .into_iter()
        .collect();

        let config = RunnerConfig::from_lookup(|k| vars.get(k).map(|v| (*v).to_string()));

        assert_eq!(config.default_cluster, "Nightly");
        assert_eq!(config.block_defaults.batch_size, 250);
        assert_eq!(config.block_defaults.workers, 1);
    }
}
