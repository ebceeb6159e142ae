//! Ready-made pipelines for scheduler tests.

use super::mocks::{ExecutionLog, RecordingLoader, VecExtractor};
use crate::errors::ConfigurationError;
use crate::pipeline::Pipeline;

/// Builds a small extract/load pipeline with explicit dependencies.
///
/// The pipeline writes its name to `log` in a pre-task, so tests can check
/// the order pipelines started in.
pub fn entity_pipeline(
    name: &str,
    target: &str,
    sources: &[&str],
    log: &ExecutionLog,
) -> Result<Pipeline, ConfigurationError> {
    sources
        .iter()
        .fold(Pipeline::builder(name).target(target), |builder, source| {
            builder.source(*source)
        })
        .pre_task("log", log.task(name))
        .extract("read", VecExtractor::new(vec![1_u32, 2, 3]))
        .load("write", RecordingLoader::<u32>::new())
        .build()
}
