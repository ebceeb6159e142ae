//! Summary sink trait and implementations.

use crate::core::{summarize, PipelineSummary};
use async_trait::async_trait;
use tracing::{info, warn, Level};

/// Receives the pipeline summaries of a finished run.
///
/// Sinks are called once per run with every summary the run produced.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SummarySink: Send + Sync {
    /// Delivers the summaries. Returns false if they could not be written.
    async fn output(&self, summaries: &[PipelineSummary]) -> bool;
}

/// A summary sink that logs every pipeline using the tracing framework.
#[derive(Debug, Clone)]
pub struct LoggingSummarySink {
    /// Level for pipelines that completed cleanly. Failed pipelines are
    /// always logged at warn.
    level: Level,
}

impl Default for LoggingSummarySink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingSummarySink {
    /// Creates a logging sink with the specified level.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a sink logging clean pipelines at debug level.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_clean(&self, summary: &PipelineSummary) {
        let rows: u64 = summary
            .blocks
            .iter()
            .map(|b| b.rows_inserted + b.rows_updated)
            .sum();
        match self.level {
            Level::TRACE | Level::DEBUG => {
                tracing::debug!(
                    pipeline = %summary.qualified_name(),
                    cluster = %summary.cluster,
                    wave = summary.group,
                    rows_written = rows,
                    runtime_ms = summary.runtime_ms,
                    "Pipeline summary"
                );
            }
            _ => {
                info!(
                    pipeline = %summary.qualified_name(),
                    cluster = %summary.cluster,
                    wave = summary.group,
                    rows_written = rows,
                    runtime_ms = summary.runtime_ms,
                    "Pipeline summary"
                );
            }
        }
    }
}

#[async_trait]
impl SummarySink for LoggingSummarySink {
    async fn output(&self, summaries: &[PipelineSummary]) -> bool {
        for summary in summaries {
            if summary.has_completed_without_error() {
                self.log_clean(summary);
                continue;
            }
            for block in &summary.blocks {
                for (message, exception) in &block.exceptions {
                    warn!(
                        pipeline = %summary.qualified_name(),
                        block = %block.name,
                        batch = exception.batch_number,
                        error = %message,
                        "Pipeline summary: batch failure"
                    );
                }
            }
            if let Some(error) = &summary.error {
                warn!(
                    pipeline = %summary.qualified_name(),
                    error = %error,
                    "Pipeline summary: pipeline failure"
                );
            }
        }

        let report = summarize(summaries);
        info!(
            pipelines = report.pipelines,
            failed = report.failed_pipelines,
            rows_extracted = report.rows_extracted,
            rows_inserted = report.rows_inserted,
            rows_updated = report.rows_updated,
            exceptions = report.exceptions,
            "Run summary"
        );
        true
    }
}
