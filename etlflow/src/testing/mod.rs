//! Testing utilities for etlflow pipelines.
//!
//! This module provides:
//! - Fake extractors, loaders, tasks, and summary sinks
//! - An in-memory connector
//! - Assertions over pipeline summaries
//! - Pipeline fixtures for scheduler tests

mod assertions;
mod fixtures;
mod memory;
mod mocks;

pub use assertions::{
    assert_pipeline_failed, assert_pipeline_succeeded, assert_wave, find_block, find_summary,
};
pub use fixtures::entity_pipeline;
pub use memory::MemoryConnector;
pub use mocks::{
    CollectingSummarySink, ExecutionLog, FailingLoader, LogTask, RecordingLoader, VecExtractor,
};
