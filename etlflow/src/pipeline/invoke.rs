//! Running one pipeline end to end.

use super::descriptor::{Pipeline, PipelineParts};
use super::linker::link_blocks;
use super::tasks::ordered;
use crate::blocks::LinkContext;
use crate::config::DEFAULT_CLUSTER;
use crate::core::{BlockSummary, PipelineSummary, StageKind, TaskTiming};
use crate::errors::EtlflowError;
use crate::observability::SpanTimer;
use crate::utils::{generate_run_id, now_utc};
use futures::future::join_all;
use tracing::{error, info, warn};

impl Pipeline {
    /// Runs the pipeline once and reports what happened.
    ///
    /// Pre-tasks run first in priority order; if one fails the chain and
    /// the post-tasks are skipped. The block chain is then linked and every
    /// block runs concurrently until its input ends, its error budget is
    /// spent, or the pipeline is cancelled. Post-tasks run once the chain
    /// has finished, whether or not it recorded failures.
    ///
    /// Never fails: problems are recorded on the returned summary. `group` is
    /// the 1-based wave the pipeline was scheduled in.
    pub async fn invoke(self, group: usize) -> PipelineSummary {
        let parts = self.into_parts();
        let timer = SpanTimer::start(parts.name.clone());
        let mut summary = PipelineSummary {
            run_id: generate_run_id(),
            cluster: parts
                .cluster
                .clone()
                .unwrap_or_else(|| DEFAULT_CLUSTER.to_string()),
            container: parts.container.clone(),
            name: parts.name.clone(),
            group,
            blocks: Vec::new(),
            started_at: now_utc(),
            runtime_ms: 0.0,
            error: None,
        };

        info!(
            pipeline = %summary.name,
            container = %summary.container,
            cluster = %summary.cluster,
            wave = group,
            run_id = %summary.run_id,
            "Pipeline started"
        );

        execute(parts, &mut summary).await;

        summary.runtime_ms = timer.elapsed_ms();
        if summary.has_completed_without_error() {
            info!(
                pipeline = %summary.name,
                cluster = %summary.cluster,
                wave = group,
                runtime_ms = summary.runtime_ms,
                "Pipeline completed"
            );
        } else {
            warn!(
                pipeline = %summary.name,
                cluster = %summary.cluster,
                wave = group,
                runtime_ms = summary.runtime_ms,
                error = summary.error.as_deref().unwrap_or(""),
                exceptions = summary.blocks.iter().map(|b| b.exceptions.len()).sum::<usize>(),
                "Pipeline completed with errors"
            );
        }
        summary
    }
}

async fn execute(parts: PipelineParts, summary: &mut PipelineSummary) {
    let PipelineParts {
        name,
        blocks,
        tasks,
        options,
        cancel,
        ..
    } = parts;

    for task in ordered(&tasks, TaskTiming::PrePipeline) {
        let outcome = task.run(cancel.clone()).await;
        let failure = outcome.exceptions.keys().next().cloned();
        summary.blocks.push(outcome);
        if let Some(reason) = failure {
            let err = EtlflowError::TaskFailed {
                task: task.label(),
                reason,
            };
            error!(pipeline = %name, error = %err, "Pre-task failed, skipping pipeline");
            summary.error = Some(err.to_string());
            return;
        }
    }

    let labels: Vec<(String, StageKind)> = blocks
        .iter()
        .map(|b| (b.name().to_string(), b.kind()))
        .collect();
    let ctx = LinkContext::new(name.clone())
        .with_defaults(options)
        .with_cancel(cancel.clone());

    let units = match link_blocks(blocks.into(), &ctx) {
        Ok(units) => units,
        Err(e) => {
            error!(
                pipeline = %name,
                error = %e,
                code = %e.error_info().code,
                "Pipeline could not be linked"
            );
            summary.error = Some(e.to_string());
            return;
        }
    };

    let handles = units.into_iter().map(|unit| tokio::spawn(unit()));
    for (joined, (block, kind)) in join_all(handles).await.into_iter().zip(labels) {
        match joined {
            Ok(block_summary) => summary.blocks.push(block_summary),
            Err(e) => {
                error!(pipeline = %name, block = %block, error = %e, "Block terminated abnormally");
                let mut failed = BlockSummary::new(block.clone(), kind);
                failed.record_exception(&anyhow::anyhow!("block '{block}' terminated: {e}"), 0);
                summary.blocks.push(failed);
                summary
                    .error
                    .get_or_insert_with(|| format!("block '{block}' terminated abnormally"));
            }
        }
    }

    for task in ordered(&tasks, TaskTiming::PostPipeline) {
        summary.blocks.push(task.run(cancel.clone()).await);
    }
}
