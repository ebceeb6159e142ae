//! Pipeline building and execution.
//!
//! This module provides:
//! - Pipeline descriptors and their builder
//! - The block linker that turns a descriptor into runnable units
//! - Pre- and post-pipeline tasks
//! - The dependency resolver that orders pipelines into waves

mod descriptor;
mod invoke;
mod linker;
mod resolver;
mod tasks;


pub use descriptor::{Pipeline, PipelineBuilder};
pub use linker::{link_blocks, validate_chain};
pub use resolver::{DependencyNode, DependencyResolver};
pub use tasks::PipelineTask;
