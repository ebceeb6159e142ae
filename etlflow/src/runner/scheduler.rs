//! The runner: discovers pipelines, orders them, and drives their waves.

use super::filter::{ContainerInfo, MethodInfo, RunFilter};
use super::registry::{ContainerRegistration, PipelineRegistry};
use super::sink::SummarySink;
use crate::config::RunnerConfig;
use crate::core::{PipelineSummary, SummaryAggregator};
use crate::pipeline::{DependencyResolver, Pipeline};
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Pipelines of one cluster, in discovery order.
struct ClusterPlan {
    name: String,
    pipelines: Vec<Pipeline>,
}

/// Runs registered pipelines in dependency order.
///
/// Every call discovers fresh pipelines from the registered factories, so a
/// runner can be reused and shared between runs.
pub struct Runner {
    registry: PipelineRegistry,
    sinks: Vec<Arc<dyn SummarySink>>,
    config: RunnerConfig,
}

impl Runner {
    /// Starts building a runner.
    #[must_use]
    pub fn builder() -> RunnerBuilder {
        RunnerBuilder::new()
    }

    /// Returns the registered containers.
    #[must_use]
    pub fn registry(&self) -> &PipelineRegistry {
        &self.registry
    }

    /// Returns the runner configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Runs every registered pipeline.
    pub async fn run_all(&self) -> Vec<PipelineSummary> {
        self.run(&RunFilter::all()).await
    }

    /// Runs the pipelines of one cluster.
    pub async fn run_cluster(&self, cluster: &str) -> Vec<PipelineSummary> {
        self.run(&RunFilter::all().cluster(cluster)).await
    }

    /// Runs the pipelines of one container.
    ///
    /// Pipelines of other containers are not run, so sources they would
    /// produce are treated as already available.
    pub async fn run_container(&self, container: &str) -> Vec<PipelineSummary> {
        self.run(&RunFilter::all().container(container)).await
    }

    /// Runs the pipelines selected by `filter`.
    ///
    /// Clusters run concurrently. Inside a cluster, waves run one after the
    /// other and the pipelines of a wave run concurrently. A cluster whose
    /// pipelines form a cycle produces no summaries; other clusters are not
    /// affected. Summaries are returned grouped by cluster in discovery
    /// order and by wave within a cluster, and are handed to every sink.
    pub async fn run(&self, filter: &RunFilter) -> Vec<PipelineSummary> {
        let plans = self.discover(filter);
        info!(
            clusters = plans.len(),
            pipelines = plans.iter().map(|p| p.pipelines.len()).sum::<usize>(),
            "Run started"
        );

        let aggregator = SummaryAggregator::new();
        let (names, handles): (Vec<String>, Vec<_>) = plans
            .into_iter()
            .map(|plan| (plan.name.clone(), tokio::spawn(run_cluster(plan))))
            .unzip();

        for (joined, cluster) in join_all(handles).await.into_iter().zip(names) {
            match joined {
                Ok(summaries) => aggregator.extend(summaries),
                Err(e) => error!(cluster = %cluster, error = %e, "Cluster terminated abnormally"),
            }
        }

        let report = aggregator.report();
        info!(
            pipelines = report.pipelines,
            failed = report.failed_pipelines,
            exceptions = report.exceptions,
            runtime_ms = report.runtime_ms,
            "Run finished"
        );

        let summaries = aggregator.into_summaries();
        for sink in &self.sinks {
            if !sink.output(&summaries).await {
                warn!(pipelines = summaries.len(), "Summary sink failed to write summaries");
            }
        }
        summaries
    }

    /// Builds fresh pipelines for every matching factory, partitioned by
    /// cluster in first-seen order.
    fn discover(&self, filter: &RunFilter) -> Vec<ClusterPlan> {
        let mut plans: Vec<ClusterPlan> = Vec::new();

        for container in self.registry.containers() {
            let cluster = container
                .cluster()
                .unwrap_or(self.config.default_cluster.as_str());
            let info = ContainerInfo {
                name: container.name(),
                cluster,
            };
            if !filter.matches_container(&info) {
                debug!(container = %container.name(), cluster, "Container filtered out");
                continue;
            }

            for pipeline in self.build_pipelines(container, cluster, filter) {
                match plans.iter_mut().find(|p| p.name == cluster) {
                    Some(plan) => plan.pipelines.push(pipeline),
                    None => plans.push(ClusterPlan {
                        name: cluster.to_string(),
                        pipelines: vec![pipeline],
                    }),
                }
            }
        }
        plans
    }

    fn build_pipelines(
        &self,
        container: &ContainerRegistration,
        cluster: &str,
        filter: &RunFilter,
    ) -> Vec<Pipeline> {
        let mut pipelines = Vec::new();
        for method in container.methods() {
            let info = MethodInfo {
                container: container.name(),
                name: method.name(),
                tags: method.tags(),
            };
            if !filter.matches_method(&info) {
                debug!(container = %container.name(), pipeline = %method.name(), "Pipeline filtered out");
                continue;
            }

            let mut pipeline = match method.build() {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    error!(
                        container = %container.name(),
                        pipeline = %method.name(),
                        error = %e,
                        "Pipeline factory failed, skipping"
                    );
                    continue;
                }
            };
            pipeline.stamp(container.name(), method.name(), cluster);
            pipeline.apply_default_options(&self.config.block_defaults);
            pipeline.ensure_target();
            pipelines.push(pipeline);
        }
        pipelines
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runner")
            .field("registry", &self.registry)
            .field("sinks", &self.sinks.len())
            .field("config", &self.config)
            .finish()
    }
}

async fn run_cluster(plan: ClusterPlan) -> Vec<PipelineSummary> {
    let ClusterPlan { name, pipelines } = plan;

    let waves = match DependencyResolver::resolve(pipelines) {
        Ok(waves) => waves,
        Err(e) => {
            error!(
                cluster = %name,
                error = %e,
                code = %e.error_info().code,
                "Cluster has circular dependencies, skipping"
            );
            return Vec::new();
        }
    };

    let mut summaries = Vec::new();
    for (index, wave) in waves.into_iter().enumerate() {
        let group = index + 1;
        info!(cluster = %name, wave = group, pipelines = wave.len(), "Wave started");

        let labels: Vec<String> = wave.iter().map(Pipeline::qualified_name).collect();
        let handles = wave
            .into_iter()
            .map(|pipeline| tokio::spawn(pipeline.invoke(group)));

        for (joined, label) in join_all(handles).await.into_iter().zip(labels) {
            match joined {
                Ok(summary) => summaries.push(summary),
                Err(e) => error!(
                    cluster = %name,
                    wave = group,
                    pipeline = %label,
                    error = %e,
                    "Pipeline terminated abnormally"
                ),
            }
        }
    }
    summaries
}

/// Builder for [`Runner`].
#[derive(Default)]
pub struct RunnerBuilder {
    registry: PipelineRegistry,
    sinks: Vec<Arc<dyn SummarySink>>,
    config: RunnerConfig,
}

impl RunnerBuilder {
    /// Creates a builder with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a container.
    #[must_use]
    pub fn container(mut self, container: ContainerRegistration) -> Self {
        self.registry.register(container);
        self
    }

    /// Replaces the registry.
    #[must_use]
    pub fn registry(mut self, registry: PipelineRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Adds a summary sink.
    #[must_use]
    pub fn sink(mut self, sink: impl SummarySink + 'static) -> Self {
        self.sinks.push(Arc::new(sink));
        self
    }

    /// Adds a shared summary sink.
    #[must_use]
    pub fn shared_sink(mut self, sink: Arc<dyn SummarySink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Sets the runner configuration.
    #[must_use]
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Builds the runner.
    #[must_use]
    pub fn build(self) -> Runner {
        Runner {
            registry: self.registry,
            sinks: self.sinks,
            config: self.config,
        }
    }
}

impl fmt::Debug for RunnerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunnerBuilder")
            .field("registry", &self.registry)
            .field("sinks", &self.sinks.len())
            .field("config", &self.config)
            .finish()
    }
}
