//! Core domain model types for etlflow.
//!
//! This module contains the fundamental types used throughout the framework:
//! - Block kind and task scheduling enums
//! - Entity types and dependency metadata
//! - Block and pipeline summaries, and their run-level aggregation

mod entity;
mod report;
mod status;
mod summary;

pub use entity::{DependencyMetadata, EntityType};
pub(crate) use entity::short_type_name;
pub use report::{summarize, RunReport, SummaryAggregator};
pub use status::{StageKind, TaskPriority, TaskTiming};
pub use summary::{BatchException, BlockSummary, PipelineSummary};
