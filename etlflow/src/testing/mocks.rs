//! Fake blocks, tasks, and sinks for testing.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::blocks::{Extractor, LoadCounts, Loader, TaskAction};
use crate::cancellation::CancellationToken;
use crate::core::PipelineSummary;
use crate::runner::SummarySink;

/// An extractor that yields a fixed list of records on every run.
#[derive(Debug, Clone)]
pub struct VecExtractor<T> {
    records: Vec<T>,
    delay: Option<Duration>,
}

impl<T> VecExtractor<T> {
    /// Creates an extractor over `records`.
    #[must_use]
    pub fn new(records: Vec<T>) -> Self {
        Self {
            records,
            delay: None,
        }
    }

    /// Sleeps before yielding each record.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl<T> Extractor<T> for VecExtractor<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn extract(&self, _cancel: Arc<CancellationToken>) -> BoxStream<'static, anyhow::Result<T>> {
        let records = futures::stream::iter(self.records.clone());
        match self.delay {
            Some(delay) => records
                .then(move |record| async move {
                    tokio::time::sleep(delay).await;
                    Ok::<T, anyhow::Error>(record)
                })
                .boxed(),
            None => records.map(Ok).boxed(),
        }
    }
}

/// A loader that keeps every batch it receives.
///
/// Clones share their storage, so a clone kept by the test sees what the
/// pipeline wrote.
#[derive(Debug)]
pub struct RecordingLoader<T> {
    batches: Arc<Mutex<Vec<Vec<T>>>>,
}

impl<T> RecordingLoader<T> {
    /// Creates an empty loader.
    #[must_use]
    pub fn new() -> Self {
        Self {
            batches: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Returns the number of batches received.
    #[must_use]
    pub fn batch_count(&self) -> usize {
        self.batches.lock().len()
    }
}

impl<T: Clone> RecordingLoader<T> {
    /// Returns every record received, in arrival order.
    #[must_use]
    pub fn records(&self) -> Vec<T> {
        self.batches.lock().iter().flatten().cloned().collect()
    }
}

impl<T> Clone for RecordingLoader<T> {
    fn clone(&self) -> Self {
        Self {
            batches: self.batches.clone(),
        }
    }
}

impl<T> Default for RecordingLoader<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T: Send + 'static> Loader<T> for RecordingLoader<T> {
    async fn load(&self, batch: Vec<T>) -> anyhow::Result<LoadCounts> {
        let rows = batch.len() as u64;
        self.batches.lock().push(batch);
        Ok(LoadCounts::inserted(rows))
    }
}

/// A loader that rejects every batch.
///
/// Each failure carries a distinct message (`batch N rejected`) unless a
/// fixed message is set.
#[derive(Debug, Clone, Default)]
pub struct FailingLoader {
    calls: Arc<AtomicUsize>,
    message: Option<String>,
}

impl FailingLoader {
    /// Creates a loader failing with a distinct message per batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a loader failing with the same message every time.
    #[must_use]
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            calls: Arc::new(AtomicUsize::new(0)),
            message: Some(message.into()),
        }
    }

    /// Returns how many batches were attempted.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<T: Send + 'static> Loader<T> for FailingLoader {
    async fn load(&self, _batch: Vec<T>) -> anyhow::Result<LoadCounts> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        match &self.message {
            Some(message) => anyhow::bail!("{message}"),
            None => anyhow::bail!("batch {call} rejected"),
        }
    }
}

/// Shared, ordered record of labels written by [`ExecutionLog::task`].
#[derive(Debug, Clone, Default)]
pub struct ExecutionLog {
    entries: Arc<Mutex<Vec<String>>>,
}

impl ExecutionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a label.
    pub fn push(&self, label: impl Into<String>) {
        self.entries.lock().push(label.into());
    }

    /// Returns the labels written so far.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    /// Returns the position of the first entry equal to `label`.
    #[must_use]
    pub fn position(&self, label: &str) -> Option<usize> {
        self.entries.lock().iter().position(|e| e == label)
    }

    /// A task that appends `label` when run.
    #[must_use]
    pub fn task(&self, label: impl Into<String>) -> LogTask {
        LogTask {
            log: self.clone(),
            label: label.into(),
        }
    }
}

/// Task returned by [`ExecutionLog::task`].
#[derive(Debug, Clone)]
pub struct LogTask {
    log: ExecutionLog,
    label: String,
}

#[async_trait]
impl TaskAction for LogTask {
    async fn run(&self, _cancel: Arc<CancellationToken>) -> anyhow::Result<()> {
        self.log.push(self.label.clone());
        Ok(())
    }
}

/// A summary sink that keeps everything it is given.
#[derive(Debug, Clone, Default)]
pub struct CollectingSummarySink {
    summaries: Arc<Mutex<Vec<PipelineSummary>>>,
    calls: Arc<AtomicUsize>,
}

impl CollectingSummarySink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every summary received.
    #[must_use]
    pub fn summaries(&self) -> Vec<PipelineSummary> {
        self.summaries.lock().clone()
    }

    /// Returns how many times the sink was called.
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SummarySink for CollectingSummarySink {
    async fn output(&self, summaries: &[PipelineSummary]) -> bool {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.summaries.lock().extend_from_slice(summaries);
        true
    }
}
