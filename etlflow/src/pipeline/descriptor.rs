//! Pipeline descriptors and their builder.

use super::linker::validate_chain;
use super::tasks::PipelineTask;
use crate::blocks::{Block, Extractor, Loader, TaskAction, Transformer};
use crate::cancellation::CancellationToken;
use crate::config::BlockOptions;
use crate::core::{DependencyMetadata, EntityType, StageKind};
use crate::errors::ConfigurationError;
use std::fmt;
use std::sync::Arc;

/// A named chain of blocks with its tasks and data dependencies.
///
/// Built once per run by a factory and consumed by [`Pipeline::invoke`].
pub struct Pipeline {
    name: String,
    container: String,
    cluster: Option<String>,
    blocks: Vec<Block>,
    tasks: Vec<PipelineTask>,
    dependencies: DependencyMetadata,
    options: Option<BlockOptions>,
    cancel: Arc<CancellationToken>,
}

impl Pipeline {
    /// Starts building a pipeline.
    pub fn builder(name: impl Into<String>) -> PipelineBuilder {
        PipelineBuilder::new(name)
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Container that registered this pipeline; empty until scheduled.
    #[must_use]
    pub fn container(&self) -> &str {
        &self.container
    }

    /// Cluster the pipeline is scheduled in, once stamped.
    #[must_use]
    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    /// Returns the blocks in declaration order.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Returns the pre- and post-tasks.
    #[must_use]
    pub fn tasks(&self) -> &[PipelineTask] {
        &self.tasks
    }

    /// Returns the target and source entity types.
    #[must_use]
    pub fn dependency_metadata(&self) -> &DependencyMetadata {
        &self.dependencies
    }

    /// Options applied to blocks that do not set their own.
    #[must_use]
    pub fn options(&self) -> Option<&BlockOptions> {
        self.options.as_ref()
    }

    /// Token that cancels this pipeline's invocation.
    #[must_use]
    pub fn cancellation(&self) -> Arc<CancellationToken> {
        self.cancel.clone()
    }

    /// `container.name`, or just the name before the pipeline is scheduled.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        if self.container.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.container, self.name)
        }
    }

    /// Records where the runner found this pipeline. The registered method
    /// name replaces the builder name.
    pub(crate) fn stamp(&mut self, container: &str, method: &str, cluster: &str) {
        self.container = container.to_string();
        self.name = method.to_string();
        self.cluster = Some(cluster.to_string());
    }

    pub(crate) fn apply_default_options(&mut self, defaults: &BlockOptions) {
        if self.options.is_none() {
            self.options = Some(defaults.clone());
        }
    }

    /// Gives a target-less pipeline a target nobody else produces, so it can
    /// be scheduled without relating to any other pipeline.
    pub(crate) fn ensure_target(&mut self) {
        if self.dependencies.target.is_none() {
            let synthetic = EntityType::named(self.qualified_name());
            self.dependencies = DependencyMetadata::new().with_target(synthetic);
        }
    }

    pub(crate) fn into_parts(self) -> PipelineParts {
        PipelineParts {
            name: self.name,
            container: self.container,
            cluster: self.cluster,
            blocks: self.blocks,
            tasks: self.tasks,
            options: self.options.unwrap_or_default(),
            cancel: self.cancel,
        }
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field("container", &self.container)
            .field("cluster", &self.cluster)
            .field("blocks", &self.blocks)
            .field("tasks", &self.tasks)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

/// A pipeline taken apart for invocation.
pub(crate) struct PipelineParts {
    pub(crate) name: String,
    pub(crate) container: String,
    pub(crate) cluster: Option<String>,
    pub(crate) blocks: Vec<Block>,
    pub(crate) tasks: Vec<PipelineTask>,
    pub(crate) options: BlockOptions,
    pub(crate) cancel: Arc<CancellationToken>,
}

/// Builder for [`Pipeline`].
///
/// Unless set explicitly, the target entity type is the record type consumed
/// by the last load block and the sources are the record types produced by
/// the extract blocks.
#[derive(Debug)]
pub struct PipelineBuilder {
    name: String,
    blocks: Vec<Block>,
    tasks: Vec<PipelineTask>,
    target: Option<EntityType>,
    sources: Vec<EntityType>,
    infer_dependencies: bool,
    options: Option<BlockOptions>,
    cancel: Option<Arc<CancellationToken>>,
}

impl PipelineBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            blocks: Vec::new(),
            tasks: Vec::new(),
            target: None,
            sources: Vec::new(),
            infer_dependencies: true,
            options: None,
            cancel: None,
        }
    }

    /// Appends a block.
    #[must_use]
    pub fn block(mut self, block: Block) -> Self {
        self.blocks.push(block);
        self
    }

    /// Appends an extract block.
    #[must_use]
    pub fn extract<T, E>(self, name: impl Into<String>, extractor: E) -> Self
    where
        T: Send + 'static,
        E: Extractor<T> + 'static,
    {
        self.block(Block::extract(name, extractor))
    }

    /// Appends a transform block.
    #[must_use]
    pub fn transform<T, U, X>(self, name: impl Into<String>, transformer: X) -> Self
    where
        T: Send + 'static,
        U: Send + 'static,
        X: Transformer<T, U> + 'static,
    {
        self.block(Block::transform(name, transformer))
    }

    /// Appends a load block.
    #[must_use]
    pub fn load<T, L>(self, name: impl Into<String>, loader: L) -> Self
    where
        T: Send + 'static,
        L: Loader<T> + 'static,
    {
        self.block(Block::load(name, loader))
    }

    /// Appends a task block to the chain.
    #[must_use]
    pub fn task(self, name: impl Into<String>, action: impl TaskAction + 'static) -> Self {
        self.block(Block::task(name, action))
    }

    /// Adds a task that runs before the chain.
    #[must_use]
    pub fn pre_task(self, name: impl Into<String>, action: impl TaskAction + 'static) -> Self {
        self.pipeline_task(PipelineTask::pre(name, action))
    }

    /// Adds a task that runs after the chain.
    #[must_use]
    pub fn post_task(self, name: impl Into<String>, action: impl TaskAction + 'static) -> Self {
        self.pipeline_task(PipelineTask::post(name, action))
    }

    /// Adds a pre- or post-task built elsewhere.
    #[must_use]
    pub fn pipeline_task(mut self, task: PipelineTask) -> Self {
        self.tasks.push(task);
        self
    }

    /// Sets the entity type this pipeline produces.
    #[must_use]
    pub fn target(mut self, target: impl Into<EntityType>) -> Self {
        self.target = Some(target.into());
        self
    }

    /// Adds an entity type this pipeline reads. Replaces inferred sources.
    #[must_use]
    pub fn source(mut self, source: impl Into<EntityType>) -> Self {
        let source = source.into();
        if !self.sources.contains(&source) {
            self.sources.push(source);
        }
        self
    }

    /// Disables target and source inference.
    #[must_use]
    pub fn without_inference(mut self) -> Self {
        self.infer_dependencies = false;
        self
    }

    /// Sets options for blocks that do not set their own.
    #[must_use]
    pub fn options(mut self, options: BlockOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Uses an externally owned cancellation token.
    #[must_use]
    pub fn cancellation(mut self, cancel: Arc<CancellationToken>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Validates the chain and builds the pipeline.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigurationError`] if the blocks cannot be linked or a
    /// block is missing required configuration.
    pub fn build(self) -> Result<Pipeline, ConfigurationError> {
        validate_chain(&self.blocks)?;
        for block in &self.blocks {
            block.validate()?;
        }

        let dependencies = self.dependency_metadata();
        Ok(Pipeline {
            name: self.name,
            container: String::new(),
            cluster: None,
            blocks: self.blocks,
            tasks: self.tasks,
            dependencies,
            options: self.options,
            cancel: self
                .cancel
                .unwrap_or_else(|| Arc::new(CancellationToken::new())),
        })
    }

    fn dependency_metadata(&self) -> DependencyMetadata {
        let mut metadata = DependencyMetadata::new();

        let target = self.target.clone().or_else(|| {
            self.infer_dependencies
                .then(|| {
                    self.blocks
                        .iter()
                        .rev()
                        .find(|b| b.kind() == StageKind::Load)
                        .and_then(Block::consumes)
                        .map(|port| port.entity())
                })
                .flatten()
        });
        if let Some(target) = target {
            metadata = metadata.with_target(target);
        }

        if !self.sources.is_empty() {
            for source in &self.sources {
                metadata = metadata.with_source(source.clone());
            }
        } else if self.infer_dependencies {
            for port in self
                .blocks
                .iter()
                .filter(|b| b.kind() == StageKind::Extract)
                .filter_map(Block::produces)
            {
                metadata = metadata.with_source(port.entity());
            }
        }
        metadata
    }
}
