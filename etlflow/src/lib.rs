//! # Etlflow
//!
//! Dependency-aware scheduling and execution of extract/transform/load
//! pipelines.
//!
//! Etlflow runs many pipelines while respecting the data dependencies between
//! them, with support for:
//!
//! - **Dependency waves**: pipelines consuming an entity type run after every
//!   pipeline producing it; independent pipelines run concurrently
//! - **Typed block chains**: extract, transform, and load blocks are linked
//!   into a chain whose record types are checked before anything runs
//! - **Error budgets**: batch failures are recorded per block, and a block
//!   stops once too many distinct failures were seen
//! - **Cluster isolation**: a failing or cyclic cluster never affects another
//! - **Summaries**: every block and pipeline reports rows, batches, and failures
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use etlflow::prelude::*;
//!
//! let runner = Runner::builder()
//!     .container(
//!         ContainerRegistration::new("Sales")
//!             .pipeline("customers", || {
//!                 Pipeline::builder("customers")
//!                     .extract("read", CustomerExtractor::new())
//!                     .load("write", CustomerLoader::new())
//!                     .build()
//!             })
//!             .pipeline("orders", || {
//!                 Pipeline::builder("orders")
//!                     .source("Customer")
//!                     .extract("read", OrderExtractor::new())
//!                     .load("write", OrderLoader::new())
//!                     .build()
//!             }),
//!     )
//!     .sink(LoggingSummarySink::default())
//!     .build();
//!
//! let summaries = runner.run_all().await;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod blocks;
pub mod cancellation;
pub mod config;
pub mod connectors;
pub mod core;
pub mod errors;
pub mod observability;
pub mod pipeline;
pub mod runner;
pub mod testing;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::blocks::{
        Block, CursorPagination, Extractor, FnTask, FnTransformer, IterExtractor, LoadCounts,
        Loader, MapTransformer, OffsetPagination, PagedExtractor, Pagination, ParameterSource,
        TaskAction, Transformer, UpsertLoader,
    };
    pub use crate::cancellation::CancellationToken;
    pub use crate::config::{BlockOptions, RunnerConfig};
    pub use crate::connectors::{LockRegistry, Parameters, QueryConnector, WriteConnector};
    pub use crate::core::{
        BlockSummary, DependencyMetadata, EntityType, PipelineSummary, RunReport, StageKind,
        SummaryAggregator, TaskPriority, TaskTiming,
    };
    pub use crate::errors::{
        CircularDependencyError, ConfigurationError, ContractErrorInfo, EtlflowError,
    };
    pub use crate::observability::{init_tracing, LogFormat};
    pub use crate::pipeline::{DependencyResolver, Pipeline, PipelineBuilder, PipelineTask};
    pub use crate::runner::{
        ContainerRegistration, LoggingSummarySink, RunFilter, Runner, SummarySink,
    };
    pub use crate::utils::{generate_run_id, Timestamp};
}
