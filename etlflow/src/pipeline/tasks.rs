//! Tasks that run before or after a pipeline's block chain.

use crate::blocks::TaskAction;
use crate::cancellation::CancellationToken;
use crate::core::{BlockSummary, StageKind, TaskPriority, TaskTiming};
use crate::observability::SpanTimer;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// A named side effect attached to a pipeline.
#[derive(Clone)]
pub struct PipelineTask {
    name: String,
    timing: TaskTiming,
    priority: TaskPriority,
    action: Arc<dyn TaskAction>,
}

impl PipelineTask {
    /// Creates a task that runs before the chain.
    pub fn pre(name: impl Into<String>, action: impl TaskAction + 'static) -> Self {
        Self::new(name, TaskTiming::PrePipeline, action)
    }

    /// Creates a task that runs after the chain.
    pub fn post(name: impl Into<String>, action: impl TaskAction + 'static) -> Self {
        Self::new(name, TaskTiming::PostPipeline, action)
    }

    fn new(name: impl Into<String>, timing: TaskTiming, action: impl TaskAction + 'static) -> Self {
        Self {
            name: name.into(),
            timing,
            priority: TaskPriority::default(),
            action: Arc::new(action),
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns when the task runs.
    #[must_use]
    pub fn timing(&self) -> TaskTiming {
        self.timing
    }

    /// Returns the task priority.
    #[must_use]
    pub fn priority(&self) -> TaskPriority {
        self.priority
    }

    /// Summary name, e.g. `pre:truncate_staging`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}:{}", self.timing, self.name)
    }

    /// Runs the task and reports its outcome as a one-batch summary.
    pub(crate) async fn run(&self, cancel: Arc<CancellationToken>) -> BlockSummary {
        let timer = SpanTimer::start(self.label());
        let mut summary = BlockSummary::new(self.label(), StageKind::Task);
        summary.total_batches = 1;

        debug!(task = %self.name, timing = %self.timing, priority = ?self.priority, "Running pipeline task");
        if let Err(error) = self.action.run(cancel).await {
            warn!(task = %self.name, timing = %self.timing, error = %error, "Pipeline task failed");
            summary.record_exception(&error, 1);
        }

        summary.runtime_ms = timer.elapsed_ms();
        summary
    }
}

impl fmt::Debug for PipelineTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineTask")
            .field("name", &self.name)
            .field("timing", &self.timing)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// Returns the tasks with `timing` in execution order.
///
/// Higher priority first; tasks of equal priority keep declaration order.
pub(crate) fn ordered(tasks: &[PipelineTask], timing: TaskTiming) -> Vec<&PipelineTask> {
    let mut selected: Vec<&PipelineTask> = tasks.iter().filter(|t| t.timing == timing).collect();
    selected.sort_by(|a, b| b.priority.cmp(&a.priority));
    selected
}
