//! Block kind and task scheduling enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of work a block performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// Produces records from a source.
    Extract,
    /// Maps one batch of records to another.
    Transform,
    /// Writes records to a destination.
    Load,
    /// A bare side effect with no data connection.
    Task,
}

impl StageKind {
    /// Returns true if blocks of this kind emit records downstream.
    #[must_use]
    pub fn is_producer(self) -> bool {
        matches!(self, Self::Extract | Self::Transform)
    }

    /// Returns true if blocks of this kind receive records from upstream.
    #[must_use]
    pub fn is_consumer(self) -> bool {
        matches!(self, Self::Transform | Self::Load)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Extract => write!(f, "extract"),
            Self::Transform => write!(f, "transform"),
            Self::Load => write!(f, "load"),
            Self::Task => write!(f, "task"),
        }
    }
}

/// When a pipeline task runs relative to the block chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTiming {
    /// Before the first block starts.
    PrePipeline,
    /// After the last block finishes.
    PostPipeline,
}

impl fmt::Display for TaskTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrePipeline => write!(f, "pre"),
            Self::PostPipeline => write!(f, "post"),
        }
    }
}

/// Ordering priority of a pipeline task. Higher runs first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    /// Runs last.
    Low,
    /// The default.
    #[default]
    Normal,
    /// Runs before normal tasks.
    High,
    /// Runs before everything else.
    Critical,
}
