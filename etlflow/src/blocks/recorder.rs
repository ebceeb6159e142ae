//! Per-block summary recording and error budget enforcement.

use crate::cancellation::CancellationToken;
use crate::core::{BlockSummary, StageKind};
use crate::observability::SpanTimer;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Semaphore, SemaphorePermit};
use tracing::{debug, warn};

/// Records the outcome of one block and decides when it must stop.
///
/// Shared between the workers of a load block, so every method takes `&self`.
///
/// Concurrent workers draw on `budget`: one permit per batch in flight, and
/// a permit is consumed for good by every new distinct failure. Recorded
/// failures plus batches in flight therefore never exceed `max_exceptions`.
#[derive(Debug)]
pub(crate) struct BlockRecorder {
    summary: Mutex<BlockSummary>,
    max_exceptions: usize,
    batches: AtomicUsize,
    exhausted: AtomicBool,
    budget: Semaphore,
    timer: SpanTimer,
}

impl BlockRecorder {
    pub(crate) fn new(name: impl Into<String>, kind: StageKind, max_exceptions: usize) -> Self {
        let name = name.into();
        let max_exceptions = max_exceptions.max(1);
        Self {
            timer: SpanTimer::start(name.clone()),
            summary: Mutex::new(BlockSummary::new(name, kind)),
            max_exceptions,
            batches: AtomicUsize::new(0),
            exhausted: AtomicBool::new(false),
            budget: Semaphore::new(max_exceptions),
        }
    }

    /// Claims the next 1-based batch number.
    pub(crate) fn next_batch(&self) -> usize {
        let number = self.batches.fetch_add(1, Ordering::SeqCst) + 1;
        self.summary.lock().total_batches = self.batches.load(Ordering::SeqCst);
        number
    }

    /// Number of the batch that would be claimed next.
    pub(crate) fn pending_batch(&self) -> usize {
        self.batches.load(Ordering::SeqCst) + 1
    }

    /// Waits until one more batch may be processed without overrunning the
    /// error budget. Returns `None` once the budget is used up.
    pub(crate) async fn reserve(&self) -> Option<SemaphorePermit<'_>> {
        self.budget.acquire().await.ok()
    }

    /// Records the failure of a batch started under `permit`.
    ///
    /// A new distinct failure keeps the permit; a repeated message hands it
    /// back. Returns true once the budget is used up.
    pub(crate) fn record_reserved_failure(
        &self,
        error: &anyhow::Error,
        batch_number: usize,
        permit: SemaphorePermit<'_>,
    ) -> bool {
        let (new_message, exhausted) = self.record(error, batch_number);
        if new_message {
            permit.forget();
        }
        exhausted
    }

    /// Records a batch failure. Returns true once the budget is used up.
    pub(crate) fn record_failure(&self, error: &anyhow::Error, batch_number: usize) -> bool {
        self.record(error, batch_number).1
    }

    fn record(&self, error: &anyhow::Error, batch_number: usize) -> (bool, bool) {
        let (new_message, distinct) = {
            let mut summary = self.summary.lock();
            let new_message = !summary.exceptions.contains_key(&error.to_string());
            if new_message && self.is_exhausted() {
                warn!(
                    block = %self.timer.name(),
                    batch = batch_number,
                    error = %error,
                    "Batch failed after the error budget was used up, not recorded"
                );
                return (false, true);
            }
            (new_message, summary.record_exception(error, batch_number))
        };
        warn!(
            block = %self.timer.name(),
            batch = batch_number,
            error = %error,
            distinct,
            max_exceptions = self.max_exceptions,
            "Batch failed"
        );

        if distinct >= self.max_exceptions && !self.exhausted.swap(true, Ordering::SeqCst) {
            self.budget.close();
            warn!(
                block = %self.timer.name(),
                "Error budget exhausted, no further batches will be processed"
            );
        }
        (new_message, self.is_exhausted())
    }

    pub(crate) fn is_exhausted(&self) -> bool {
        self.exhausted.load(Ordering::SeqCst)
    }

    /// Returns true if the block must not take another batch.
    pub(crate) fn should_stop(&self, cancel: &CancellationToken) -> bool {
        if cancel.is_cancelled() {
            debug!(block = %self.timer.name(), "Cancellation requested, skipping remaining batches");
            return true;
        }
        self.is_exhausted()
    }

    /// Applies a change to the summary counters.
    pub(crate) fn update(&self, apply: impl FnOnce(&mut BlockSummary)) {
        apply(&mut self.summary.lock());
    }

    /// Returns the final summary with its runtime filled in.
    pub(crate) fn finish(&self) -> BlockSummary {
        let mut summary = self.summary.lock().clone();
        summary.runtime_ms = self.timer.elapsed_ms();
        debug!(
            block = %summary.name,
            kind = %summary.kind,
            batches = summary.total_batches,
            exceptions = summary.exceptions.len(),
            runtime_ms = summary.runtime_ms,
            "Block finished"
        );
        summary
    }
}
