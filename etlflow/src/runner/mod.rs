//! Running registered pipelines.
//!
//! This module provides:
//! - The pipeline registry and its container registrations
//! - Run filters over clusters, containers, tags, and names
//! - The [`Runner`] that resolves waves per cluster and drives them
//! - Summary sinks that receive the outcome of a run

mod filter;
mod registry;
mod scheduler;
mod sink;

#[cfg(test)]
mod integration_tests;

pub use filter::{ContainerInfo, MethodInfo, RunFilter};
pub use registry::{ContainerRegistration, PipelineFactory, PipelineMethod, PipelineRegistry};
pub use scheduler::{Runner, RunnerBuilder};
pub use sink::{LoggingSummarySink, SummarySink};
