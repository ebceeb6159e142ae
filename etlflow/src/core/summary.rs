//! Block and pipeline outcome records.

use super::StageKind;
use crate::utils::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A batch failure recorded against a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchException {
    /// Full error description including its cause chain.
    pub detail: String,
    /// The 1-based batch number that was being processed.
    pub batch_number: usize,
}

/// Outcome of a single block (or pipeline task) within one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockSummary {
    /// Block name.
    pub name: String,
    /// Block kind.
    pub kind: StageKind,
    /// Records pulled from the source.
    pub rows_extracted: u64,
    /// Records emitted by a transform.
    pub rows_transformed: u64,
    /// Records inserted by a load.
    pub rows_inserted: u64,
    /// Records updated by a load.
    pub rows_updated: u64,
    /// Batches handled by this block, including failed ones.
    pub total_batches: usize,
    /// Recorded failures keyed by error message.
    #[serde(default)]
    pub exceptions: BTreeMap<String, BatchException>,
    /// Wall time in milliseconds.
    pub runtime_ms: f64,
}

impl BlockSummary {
    /// Creates an empty summary.
    #[must_use]
    pub fn new(name: impl Into<String>, kind: StageKind) -> Self {
        Self {
            name: name.into(),
            kind,
            rows_extracted: 0,
            rows_transformed: 0,
            rows_inserted: 0,
            rows_updated: 0,
            total_batches: 0,
            exceptions: BTreeMap::new(),
            runtime_ms: 0.0,
        }
    }

    /// Records a batch failure and returns the number of distinct failures.
    ///
    /// Only the first batch that failed with a given message is kept.
    pub fn record_exception(&mut self, error: &anyhow::Error, batch_number: usize) -> usize {
        self.exceptions
            .entry(error.to_string())
            .or_insert_with(|| BatchException {
                detail: format!("{error:#}"),
                batch_number,
            });
        self.exceptions.len()
    }

    /// Returns true if no failure was recorded.
    #[must_use]
    pub fn has_completed_without_error(&self) -> bool {
        self.exceptions.is_empty()
    }
}

/// Outcome of one pipeline invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineSummary {
    /// Unique id of this invocation.
    pub run_id: Uuid,
    /// Cluster the pipeline was scheduled in.
    pub cluster: String,
    /// Container the pipeline was registered by.
    pub container: String,
    /// Pipeline name.
    pub name: String,
    /// 1-based wave index within the cluster.
    pub group: usize,
    /// Per-block outcomes in declaration order, framed by pre/post tasks.
    pub blocks: Vec<BlockSummary>,
    /// When the invocation started.
    pub started_at: Timestamp,
    /// Wall time in milliseconds.
    pub runtime_ms: f64,
    /// Failure that stopped the pipeline outside of batch processing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PipelineSummary {
    /// Returns true if the pipeline ran and every block finished cleanly.
    #[must_use]
    pub fn has_completed_without_error(&self) -> bool {
        self.error.is_none()
            && self
                .blocks
                .iter()
                .all(BlockSummary::has_completed_without_error)
    }

    /// Returns the summary of the named block.
    #[must_use]
    pub fn block(&self, name: &str) -> Option<&BlockSummary> {
        self.blocks.iter().find(|b| b.name == name)
    }

    /// Qualified `container.name` label.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.container, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::now_utc;

    fn summary_with(blocks: Vec<BlockSummary>) -> PipelineSummary {
        PipelineSummary {
            run_id: Uuid::new_v4(),
            cluster: "Default".to_string(),
            container: "Sales".to_string(),
            name: "customers".to_string(),
            group: 1,
            blocks,
            started_at: now_utc(),
            runtime_ms: 0.0,
            error: None,
        }
    }

    #[test]
    fn test_block_summary_records_distinct_messages() {
        let mut block = BlockSummary::new("load", StageKind::Load);
        assert!(block.has_completed_without_error());

        assert_eq!(block.record_exception(&anyhow::anyhow!("timeout"), 1), 1);
        assert_eq!(block.record_exception(&anyhow::anyhow!("timeout"), 2), 1);
        assert_eq!(block.record_exception(&anyhow::anyhow!("constraint"), 3), 2);

        assert!(!block.has_completed_without_error());
        assert_eq!(block.exceptions["timeout"].batch_number, 1);
        assert_eq!(block.exceptions["constraint"].batch_number, 3);
    }

    #[test]
    fn test_exception_detail_keeps_context() {
        let mut block = BlockSummary::new("load", StageKind::Load);
        let err = anyhow::anyhow!("connection reset").context("insert failed");
        block.record_exception(&err, 4);

        let recorded = &block.exceptions["insert failed"];
        assert!(recorded.detail.contains("connection reset"));
    }

    #[test]
    fn test_pipeline_summary_derives_status() {
        let clean = summary_with(vec![BlockSummary::new("extract", StageKind::Extract)]);
        assert!(clean.has_completed_without_error());

        let mut failing = BlockSummary::new("load", StageKind::Load);
        failing.record_exception(&anyhow::anyhow!("boom"), 1);
        let dirty = summary_with(vec![failing]);
        assert!(!dirty.has_completed_without_error());

        let mut aborted = summary_with(Vec::new());
        aborted.error = Some("link failed".to_string());
        assert!(!aborted.has_completed_without_error());
    }

    #[test]
    fn test_block_lookup() {
        let summary = summary_with(vec![
            BlockSummary::new("extract", StageKind::Extract),
            BlockSummary::new("load", StageKind::Load),
        ]);
        assert_eq!(summary.block("load").map(|b| b.kind), Some(StageKind::Load));
        assert!(summary.block("missing").is_none());
        assert_eq!(summary.qualified_name(), "Sales.customers");
    }
}
