//! Pipeline blocks.
//!
//! A block is one unit of a pipeline: an extract, transform, or load step, or
//! a bare task. Data blocks are generic over the record types they exchange;
//! [`Block`] erases those types so a pipeline can hold a heterogeneous list,
//! and keeps a [`PortType`] per side so the linker can check that each
//! producer feeds a consumer of the same record type.
//!
//! Linked blocks exchange `Vec<T>` batches over bounded channels. Every block
//! becomes one [`UnitOfWork`] that runs concurrently with its neighbours.

mod extract;
mod load;
mod paged;
mod recorder;
mod task;
mod transform;
mod upsert;

pub use extract::{Extractor, IterExtractor};
pub use load::{LoadCounts, Loader};
pub use paged::{
    CursorPagination, OffsetPagination, PageInfo, PagedExtractor, Pagination, ParameterSource,
};
pub use task::{FnTask, TaskAction};
pub use transform::{FnTransformer, MapTransformer, Transformer};
pub use upsert::{record_fingerprint, UpsertLoader};

pub(crate) use recorder::BlockRecorder;

use crate::cancellation::CancellationToken;
use crate::config::BlockOptions;
use crate::core::{short_type_name, BlockSummary, EntityType, StageKind};
use crate::errors::ConfigurationError;
use futures::future::BoxFuture;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// One executable block of a linked chain.
pub type UnitOfWork = Box<dyn FnOnce() -> BoxFuture<'static, BlockSummary> + Send>;

/// The sending half of a link, with its record type erased.
pub(crate) type Outlet = Box<dyn Any + Send>;

/// Record type carried by one side of a block.
#[derive(Clone, Copy)]
pub struct PortType {
    id: TypeId,
    name: &'static str,
}

impl PortType {
    /// Returns the port type for records of type `T`.
    #[must_use]
    pub fn of<T: 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    /// Returns the unqualified record type name.
    #[must_use]
    pub fn name(&self) -> String {
        short_type_name(self.name)
    }

    /// Returns the entity type named after the record type.
    #[must_use]
    pub fn entity(&self) -> EntityType {
        EntityType::named(self.name())
    }
}

impl PartialEq for PortType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for PortType {}

impl fmt::Debug for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

impl fmt::Display for PortType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

/// Shared inputs handed to every block of a pipeline when it is linked.
#[derive(Debug, Clone)]
pub struct LinkContext {
    /// Pipeline name, used in log fields.
    pub pipeline: String,
    /// Cancellation source of the invocation.
    pub cancel: Arc<CancellationToken>,
    /// Options for blocks that do not set their own.
    pub defaults: BlockOptions,
}

impl LinkContext {
    /// Creates a link context with default options and a fresh token.
    #[must_use]
    pub fn new(pipeline: impl Into<String>) -> Self {
        Self {
            pipeline: pipeline.into(),
            cancel: Arc::new(CancellationToken::new()),
            defaults: BlockOptions::default(),
        }
    }

    /// Sets the default block options.
    #[must_use]
    pub fn with_defaults(mut self, defaults: BlockOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Sets the cancellation token.
    #[must_use]
    pub fn with_cancel(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = cancel;
        self
    }
}

/// Type-erased behaviour shared by every block kind.
pub(crate) trait BlockRuntime: Send {
    fn name(&self) -> &str;

    fn kind(&self) -> StageKind;

    /// Declared type name, e.g. `TransformBlock<Order, OrderRow>`.
    fn type_name(&self) -> String;

    fn produces(&self) -> Option<PortType> {
        None
    }

    fn consumes(&self) -> Option<PortType> {
        None
    }

    fn options(&self) -> Option<&BlockOptions>;

    fn set_options(&mut self, options: BlockOptions);

    /// Checks configuration that does not depend on neighbours.
    fn validate(&self) -> Result<(), ConfigurationError> {
        Ok(())
    }

    /// Creates the inbound channel and returns its sending half.
    fn open_inlet(&mut self, _capacity: usize) -> Option<Outlet> {
        None
    }

    /// Attaches the sending half of the successor's inbound channel.
    fn connect(&mut self, _outlet: Outlet) -> Result<(), String> {
        Err(format!("{} blocks do not emit records", self.kind()))
    }

    /// Consumes the block into its executable unit.
    fn into_unit(self: Box<Self>, ctx: &LinkContext) -> Result<UnitOfWork, ConfigurationError>;
}

/// A single block of a pipeline.
pub struct Block {
    inner: Box<dyn BlockRuntime>,
}

impl Block {
    /// Creates an extract block producing records of type `T`.
    pub fn extract<T, E>(name: impl Into<String>, extractor: E) -> Self
    where
        T: Send + 'static,
        E: Extractor<T> + 'static,
    {
        Self::from_runtime(extract::ExtractBlock::new(name, Arc::new(extractor)))
    }

    /// Creates a transform block mapping batches of `T` to batches of `U`.
    pub fn transform<T, U, X>(name: impl Into<String>, transformer: X) -> Self
    where
        T: Send + 'static,
        U: Send + 'static,
        X: Transformer<T, U> + 'static,
    {
        Self::from_runtime(transform::TransformBlock::new(name, Arc::new(transformer)))
    }

    /// Creates a load block writing records of type `T`.
    pub fn load<T, L>(name: impl Into<String>, loader: L) -> Self
    where
        T: Send + 'static,
        L: Loader<T> + 'static,
    {
        Self::from_runtime(load::LoadBlock::new(name, Arc::new(loader)))
    }

    /// Creates a bare task block with no data connection.
    pub fn task<A>(name: impl Into<String>, action: A) -> Self
    where
        A: TaskAction + 'static,
    {
        Self::from_runtime(task::TaskBlock::new(name, Arc::new(action)))
    }

    fn from_runtime(runtime: impl BlockRuntime + 'static) -> Self {
        Self {
            inner: Box::new(runtime),
        }
    }

    /// Overrides the options of this block.
    #[must_use]
    pub fn with_options(mut self, options: BlockOptions) -> Self {
        self.inner.set_options(options);
        self
    }

    /// Returns the block name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Returns the block kind.
    #[must_use]
    pub fn kind(&self) -> StageKind {
        self.inner.kind()
    }

    /// Returns the declared type name.
    #[must_use]
    pub fn type_name(&self) -> String {
        self.inner.type_name()
    }

    /// Returns the record type this block emits.
    #[must_use]
    pub fn produces(&self) -> Option<PortType> {
        self.inner.produces()
    }

    /// Returns the record type this block receives.
    #[must_use]
    pub fn consumes(&self) -> Option<PortType> {
        self.inner.consumes()
    }

    /// Returns the options set on this block, if any.
    #[must_use]
    pub fn options(&self) -> Option<&BlockOptions> {
        self.inner.options()
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        self.inner.validate()
    }

    pub(crate) fn open_inlet(&mut self, capacity: usize) -> Option<Outlet> {
        self.inner.open_inlet(capacity)
    }

    pub(crate) fn connect(&mut self, outlet: Outlet) -> Result<(), String> {
        self.inner.connect(outlet)
    }

    pub(crate) fn into_unit(self, ctx: &LinkContext) -> Result<UnitOfWork, ConfigurationError> {
        self.inner.into_unit(ctx)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .field("type_name", &self.type_name())
            .finish()
    }
}

/// Resolves the effective options of a block.
pub(crate) fn effective_options(own: Option<&BlockOptions>, ctx: &LinkContext) -> BlockOptions {
    own.cloned().unwrap_or_else(|| ctx.defaults.clone())
}

/// Type name of a block struct without module paths.
pub(crate) fn block_type_name<B: ?Sized>() -> String {
    short_type_name(std::any::type_name::<B>())
}
