//! Error types for the etlflow framework.
//!
//! Configuration problems surface before a pipeline starts, dependency-graph
//! problems abort a single cluster, and everything that happens inside a batch
//! is recorded on a [`BlockSummary`](crate::core::BlockSummary) instead of
//! being raised.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for etlflow operations.
#[derive(Debug, Error)]
pub enum EtlflowError {
    /// A pipeline could not be linked or configured.
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    /// The pipeline dependency graph of a cluster contains a cycle.
    #[error("{0}")]
    CircularDependency(#[from] CircularDependencyError),

    /// A paginating extractor did not advance its parameters.
    #[error("Pagination stalled for '{extractor}': parameters did not change after page {page}")]
    PaginationStalled {
        /// The extractor name.
        extractor: String,
        /// The 1-based page after which the parameters stayed the same.
        page: usize,
    },

    /// A pipeline task failed.
    #[error("Task '{task}' failed: {reason}")]
    TaskFailed {
        /// The task name.
        task: String,
        /// The failure description.
        reason: String,
    },

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Metadata about an error for better diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ContractErrorInfo {
    /// Error code (e.g., "CONFIG-002-ADJACENCY").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default)]
    pub context: HashMap<String, String>,
}

impl ContractErrorInfo {
    /// Creates a new contract error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised while linking or configuring the blocks of a pipeline.
///
/// Positions are 0-based indexes into the pipeline's declared block list.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// The pipeline has fewer than two blocks.
    #[error("Too few blocks to link: expected at least 2, found {count}")]
    TooFewBlocks {
        /// The number of blocks supplied.
        count: usize,
    },

    /// Two adjacent data blocks cannot be connected.
    #[error("Incompatible block at position {position} ({type_name}): {reason}")]
    IncompatibleAdjacency {
        /// Position of the offending block.
        position: usize,
        /// Declared type name of the offending block.
        type_name: String,
        /// What did not line up.
        reason: String,
    },

    /// Connecting a block to its successor failed.
    #[error("Failed to connect block at position {position} ({type_name}): {reason}")]
    Connect {
        /// Position of the block being connected.
        position: usize,
        /// Declared type name of the block being connected.
        type_name: String,
        /// The underlying failure.
        reason: String,
    },

    /// A block requires a connector that was never configured.
    #[error("Block '{block}' requires a {connector} connector but none was configured")]
    UnconfiguredConnector {
        /// The block name.
        block: String,
        /// The kind of connector expected.
        connector: String,
    },
}

impl ConfigurationError {
    /// Returns the position of the offending block, when the error has one.
    #[must_use]
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::IncompatibleAdjacency { position, .. } | Self::Connect { position, .. } => {
                Some(*position)
            }
            Self::TooFewBlocks { .. } | Self::UnconfiguredConnector { .. } => None,
        }
    }

    /// Rewrites the position of a positional error.
    #[must_use]
    pub(crate) fn at_position(mut self, at: usize) -> Self {
        if let Self::IncompatibleAdjacency { position, .. } | Self::Connect { position, .. } =
            &mut self
        {
            *position = at;
        }
        self
    }

    /// Returns structured diagnostics for this error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        match self {
            Self::TooFewBlocks { count } => {
                ContractErrorInfo::new("CONFIG-001-TOO_FEW", self.to_string())
                    .with_fix_hint("A pipeline needs at least a producer and a consumer block.")
                    .with_context_entry("count", count.to_string())
            }
            Self::IncompatibleAdjacency {
                position,
                type_name,
                ..
            } => ContractErrorInfo::new("CONFIG-002-ADJACENCY", self.to_string())
                .with_fix_hint(
                    "Each block must consume exactly the record type its predecessor produces.",
                )
                .with_context_entry("position", position.to_string())
                .with_context_entry("type_name", type_name.clone()),
            Self::Connect {
                position,
                type_name,
                ..
            } => ContractErrorInfo::new("CONFIG-003-CONNECT", self.to_string())
                .with_context_entry("position", position.to_string())
                .with_context_entry("type_name", type_name.clone()),
            Self::UnconfiguredConnector { block, connector } => {
                ContractErrorInfo::new("CONFIG-004-CONNECTOR", self.to_string())
                    .with_fix_hint("Attach a connector before adding the block to a pipeline.")
                    .with_context_entry("block", block.clone())
                    .with_context_entry("connector", connector.clone())
            }
        }
    }
}

/// Error raised when the pipelines of a cluster depend on each other in a cycle.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Circular dependency between pipelines: {}", pipelines.join(", "))]
pub struct CircularDependencyError {
    /// Names of the pipelines that could not be placed in a wave.
    pub pipelines: Vec<String>,
    /// Entity types that never reached zero in-degree.
    pub entity_types: Vec<String>,
}

impl CircularDependencyError {
    /// Creates a new circular dependency error.
    #[must_use]
    pub fn new(pipelines: Vec<String>, entity_types: Vec<String>) -> Self {
        Self {
            pipelines,
            entity_types,
        }
    }

    /// Returns structured diagnostics for this error.
    #[must_use]
    pub fn error_info(&self) -> ContractErrorInfo {
        ContractErrorInfo::new("GRAPH-001-CYCLE", self.to_string())
            .with_fix_hint("Remove one of the source entity types in the cycle to break it.")
            .with_context_entry("entity_types", self.entity_types.join(" -> "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contract_error_info_creation() {
        let info = ContractErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("block", "load");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("block"), Some(&"load".to_string()));
    }

    #[test]
    fn test_adjacency_error_position() {
        let err = ConfigurationError::IncompatibleAdjacency {
            position: 2,
            type_name: "TransformBlock<Order, OrderRow>".to_string(),
            reason: "expects Order but predecessor produces OrderRow".to_string(),
        };

        assert_eq!(err.position(), Some(2));
        assert!(err.to_string().contains("position 2"));
        assert_eq!(err.error_info().code, "CONFIG-002-ADJACENCY");
    }

    #[test]
    fn test_too_few_blocks_has_no_position() {
        let err = ConfigurationError::TooFewBlocks { count: 1 };
        assert_eq!(err.position(), None);
        assert_eq!(err.error_info().code, "CONFIG-001-TOO_FEW");
    }

    #[test]
    fn test_circular_dependency_error() {
        let err = CircularDependencyError::new(
            vec!["x".to_string(), "y".to_string()],
            vec!["P".to_string(), "Q".to_string()],
        );

        assert!(err.to_string().contains("x, y"));
        assert_eq!(err.error_info().code, "GRAPH-001-CYCLE");
    }

    #[test]
    fn test_configuration_error_converts() {
        let err: EtlflowError = ConfigurationError::TooFewBlocks { count: 0 }.into();
        assert!(matches!(err, EtlflowError::Configuration(_)));
    }
}
