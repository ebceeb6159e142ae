//! Run-level aggregation of pipeline summaries.

use super::PipelineSummary;
use crate::observability::SpanTimer;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Totals across every pipeline of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Pipelines that produced a summary.
    pub pipelines: usize,
    /// Pipelines with at least one recorded failure.
    pub failed_pipelines: usize,
    /// Sum of extracted rows.
    pub rows_extracted: u64,
    /// Sum of transformed rows.
    pub rows_transformed: u64,
    /// Sum of inserted rows.
    pub rows_inserted: u64,
    /// Sum of updated rows.
    pub rows_updated: u64,
    /// Sum of distinct batch failures across blocks.
    pub exceptions: usize,
    /// Wall time of the whole run in milliseconds.
    pub runtime_ms: f64,
}

impl RunReport {
    /// Returns true if every pipeline completed cleanly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed_pipelines == 0
    }
}

/// Collects pipeline summaries as they finish.
///
/// Safe to share between concurrently running clusters.
#[derive(Debug)]
pub struct SummaryAggregator {
    summaries: Mutex<Vec<PipelineSummary>>,
    timer: SpanTimer,
}

impl SummaryAggregator {
    /// Creates an empty aggregator and starts its clock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            summaries: Mutex::new(Vec::new()),
            timer: SpanTimer::start("run"),
        }
    }

    /// Adds a finished pipeline.
    pub fn push(&self, summary: PipelineSummary) {
        self.summaries.lock().push(summary);
    }

    /// Adds several finished pipelines, keeping their order.
    pub fn extend(&self, summaries: impl IntoIterator<Item = PipelineSummary>) {
        self.summaries.lock().extend(summaries);
    }

    /// Returns the number of collected summaries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.summaries.lock().len()
    }

    /// Returns true if nothing has been collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.summaries.lock().is_empty()
    }

    /// Computes totals over what has been collected so far.
    #[must_use]
    pub fn report(&self) -> RunReport {
        let mut report = summarize(&self.summaries.lock());
        report.runtime_ms = self.timer.elapsed_ms();
        report
    }

    /// Consumes the aggregator, returning summaries in collection order.
    #[must_use]
    pub fn into_summaries(self) -> Vec<PipelineSummary> {
        self.summaries.into_inner()
    }
}

impl Default for SummaryAggregator {
    fn default() -> Self {
        Self::new()
    }
}

/// Computes totals over a finished set of summaries.
#[must_use]
pub fn summarize(summaries: &[PipelineSummary]) -> RunReport {
    let mut report = RunReport {
        pipelines: summaries.len(),
        ..RunReport::default()
    };

    for pipeline in summaries {
        if !pipeline.has_completed_without_error() {
            report.failed_pipelines += 1;
        }
        for block in &pipeline.blocks {
            report.rows_extracted += block.rows_extracted;
            report.rows_transformed += block.rows_transformed;
            report.rows_inserted += block.rows_inserted;
            report.rows_updated += block.rows_updated;
            report.exceptions += block.exceptions.len();
        }
        report.runtime_ms = report.runtime_ms.max(pipeline.runtime_ms);
    }

    report
}
