//! Explicit registration of pipeline containers and their factories.

use crate::errors::EtlflowError;
use crate::pipeline::Pipeline;
use std::fmt;
use std::sync::Arc;

/// Builds a fresh pipeline on every call.
pub type PipelineFactory = Arc<dyn Fn() -> Result<Pipeline, EtlflowError> + Send + Sync>;

/// A named pipeline factory of a container.
#[derive(Clone)]
pub struct PipelineMethod {
    name: String,
    tags: Vec<String>,
    factory: PipelineFactory,
}

impl PipelineMethod {
    /// Method name; becomes the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tags used by [`RunFilter`](super::RunFilter).
    #[must_use]
    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    /// Invokes the factory.
    ///
    /// # Errors
    ///
    /// Returns whatever the factory returned.
    pub fn build(&self) -> Result<Pipeline, EtlflowError> {
        (self.factory)()
    }
}

impl fmt::Debug for PipelineMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineMethod")
            .field("name", &self.name)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}

/// A group of pipeline factories sharing a name and, optionally, a cluster.
#[derive(Debug, Clone)]
pub struct ContainerRegistration {
    name: String,
    cluster: Option<String>,
    methods: Vec<PipelineMethod>,
}

impl ContainerRegistration {
    /// Creates a container with no cluster and no pipelines.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cluster: None,
            methods: Vec::new(),
        }
    }

    /// Places the container in a named cluster.
    #[must_use]
    pub fn in_cluster(mut self, cluster: impl Into<String>) -> Self {
        self.cluster = Some(cluster.into());
        self
    }

    /// Registers an untagged pipeline factory.
    #[must_use]
    pub fn pipeline<F, E>(self, name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<Pipeline, E> + Send + Sync + 'static,
        E: Into<EtlflowError>,
    {
        self.tagged_pipeline(name, Vec::<String>::new(), factory)
    }

    /// Registers a pipeline factory with tags.
    #[must_use]
    pub fn tagged_pipeline<F, E, I, S>(mut self, name: impl Into<String>, tags: I, factory: F) -> Self
    where
        F: Fn() -> Result<Pipeline, E> + Send + Sync + 'static,
        E: Into<EtlflowError>,
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods.push(PipelineMethod {
            name: name.into(),
            tags: tags.into_iter().map(Into::into).collect(),
            factory: Arc::new(move || -> Result<Pipeline, EtlflowError> {
                factory().map_err(Into::into)
            }),
        });
        self
    }

    /// Container name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared cluster, if any.
    #[must_use]
    pub fn cluster(&self) -> Option<&str> {
        self.cluster.as_deref()
    }

    /// Registered factories in registration order.
    #[must_use]
    pub fn methods(&self) -> &[PipelineMethod] {
        &self.methods
    }
}

/// Every container known to a runner, in registration order.
#[derive(Debug, Clone, Default)]
pub struct PipelineRegistry {
    containers: Vec<ContainerRegistration>,
}

impl PipelineRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a container.
    pub fn register(&mut self, container: ContainerRegistration) {
        self.containers.push(container);
    }

    /// Returns the registered containers.
    #[must_use]
    pub fn containers(&self) -> &[ContainerRegistration] {
        &self.containers
    }

    /// Number of registered containers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.containers.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.containers.is_empty()
    }
}
