//! Extract blocks.

use super::{
    block_type_name, effective_options, BlockRecorder, BlockRuntime, LinkContext, Outlet,
    PortType, UnitOfWork,
};
use crate::cancellation::CancellationToken;
use crate::config::BlockOptions;
use crate::core::StageKind;
use crate::errors::ConfigurationError;
use futures::stream::{BoxStream, StreamExt};
use futures::FutureExt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// A source of records.
///
/// `extract` is called once per pipeline invocation and must return a fresh
/// stream every time. Errors yielded by the stream are recorded against the
/// batch being assembled; the stream keeps being polled until it ends, the
/// error budget is spent, or the invocation is cancelled.
pub trait Extractor<T>: Send + Sync {
    /// Starts reading records.
    fn extract(&self, cancel: Arc<CancellationToken>) -> BoxStream<'static, anyhow::Result<T>>;

    /// Checks that the extractor is fully configured.
    fn validate(&self, _block: &str) -> Result<(), ConfigurationError> {
        Ok(())
    }
}

/// Extracts from an iterator built fresh for every invocation.
pub struct IterExtractor<F> {
    factory: F,
}

impl<F> IterExtractor<F> {
    /// Creates an extractor that calls `factory` on every run.
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F, I, T> Extractor<T> for IterExtractor<F>
where
    F: Fn() -> I + Send + Sync,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
    T: Send + 'static,
{
    fn extract(&self, _cancel: Arc<CancellationToken>) -> BoxStream<'static, anyhow::Result<T>> {
        futures::stream::iter((self.factory)().into_iter().map(Ok)).boxed()
    }
}

pub(crate) struct ExtractBlock<T> {
    name: String,
    extractor: Arc<dyn Extractor<T>>,
    options: Option<BlockOptions>,
    outlet: Option<mpsc::Sender<Vec<T>>>,
    _records: PhantomData<fn() -> T>,
}

impl<T: Send + 'static> ExtractBlock<T> {
    pub(crate) fn new(name: impl Into<String>, extractor: Arc<dyn Extractor<T>>) -> Self {
        Self {
            name: name.into(),
            extractor,
            options: None,
            outlet: None,
            _records: PhantomData,
        }
    }
}

impl<T: Send + 'static> BlockRuntime for ExtractBlock<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Extract
    }

    fn type_name(&self) -> String {
        block_type_name::<Self>()
    }

    fn produces(&self) -> Option<PortType> {
        Some(PortType::of::<T>())
    }

    fn options(&self) -> Option<&BlockOptions> {
        self.options.as_ref()
    }

    fn set_options(&mut self, options: BlockOptions) {
        self.options = Some(options);
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        self.extractor.validate(&self.name)
    }

    fn connect(&mut self, outlet: Outlet) -> Result<(), String> {
        let sender = outlet
            .downcast::<mpsc::Sender<Vec<T>>>()
            .map_err(|_| format!("successor does not accept {}", PortType::of::<T>()))?;
        self.outlet = Some(*sender);
        Ok(())
    }

    fn into_unit(self: Box<Self>, ctx: &LinkContext) -> Result<UnitOfWork, ConfigurationError> {
        self.validate()?;
        let options = effective_options(self.options.as_ref(), ctx);
        let cancel = ctx.cancel.clone();
        let ExtractBlock {
            name,
            extractor,
            outlet,
            ..
        } = *self;
        let outlet = outlet.ok_or_else(|| ConfigurationError::Connect {
            position: 0,
            type_name: block_type_name::<Self>(),
            reason: format!("extract block '{name}' was never connected"),
        })?;

        Ok(Box::new(move || {
            run_extract(name, extractor, outlet, options, cancel).boxed()
        }))
    }
}

async fn run_extract<T: Send + 'static>(
    name: String,
    extractor: Arc<dyn Extractor<T>>,
    outlet: mpsc::Sender<Vec<T>>,
    options: BlockOptions,
    cancel: Arc<CancellationToken>,
) -> crate::core::BlockSummary {
    let recorder = BlockRecorder::new(&name, StageKind::Extract, options.max_exceptions);
    let mut stream = extractor.extract(cancel.clone());
    let mut batch = Vec::with_capacity(options.batch_size);
    let mut downstream_open = true;

    while !recorder.should_stop(&cancel) {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = stream.next() => next,
        };
        match next {
            None => break,
            Some(Ok(record)) => {
                batch.push(record);
                if batch.len() >= options.batch_size {
                    let full = std::mem::replace(&mut batch, Vec::with_capacity(options.batch_size));
                    if !send_batch(&recorder, &outlet, full).await {
                        downstream_open = false;
                        break;
                    }
                }
            }
            Some(Err(error)) => {
                recorder.record_failure(&error, recorder.pending_batch());
            }
        }
    }

    // The batch being assembled when the stream stopped still goes out,
    // unless the budget is spent or nobody is listening.
    if downstream_open && !batch.is_empty() && !recorder.is_exhausted() {
        send_batch(&recorder, &outlet, batch).await;
    }

    recorder.finish()
}

async fn send_batch<T>(recorder: &BlockRecorder, outlet: &mpsc::Sender<Vec<T>>, batch: Vec<T>) -> bool {
    let rows = batch.len() as u64;
    let number = recorder.next_batch();
    recorder.update(|s| s.rows_extracted += rows);

    if outlet.send(batch).await.is_err() {
        debug!(batch = number, "Downstream block stopped, ending extraction");
        return false;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::Block;

    fn linked(block: Block, capacity: usize) -> (UnitOfWork, mpsc::Receiver<Vec<u32>>) {
        let (tx, rx) = mpsc::channel::<Vec<u32>>(capacity);
        let mut block = block;
        block.connect(Box::new(tx)).unwrap();
        let unit = block.into_unit(&LinkContext::new("test")).unwrap();
        (unit, rx)
    }

    #[tokio::test]
    async fn test_extract_batches_records() {
        let block = Block::extract("read", IterExtractor::new(|| (1..=5).collect::<Vec<u32>>()))
            .with_options(BlockOptions::new().with_batch_size(2));
        let (unit, mut rx) = linked(block, 8);

        let summary = unit().await;
        let mut batches = Vec::new();
        while let Some(batch) = rx.recv().await {
            batches.push(batch);
        }

        assert_eq!(batches, vec![vec![1, 2], vec![3, 4], vec![5]]);
        assert_eq!(summary.rows_extracted, 5);
        assert_eq!(summary.total_batches, 3);
        assert!(summary.has_completed_without_error());
    }

    struct FlakyExtractor;

    impl Extractor<u32> for FlakyExtractor {
        fn extract(&self, _cancel: Arc<CancellationToken>) -> BoxStream<'static, anyhow::Result<u32>> {
            futures::stream::iter(vec![
                Ok(1),
                Err(anyhow::anyhow!("bad row")),
                Ok(2),
            ])
            .boxed()
        }
    }

    #[tokio::test]
    async fn test_extract_records_stream_errors() {
        let block = Block::extract("read", FlakyExtractor);
        let (unit, mut rx) = linked(block, 8);

        let summary = unit().await;
        assert_eq!(rx.recv().await, Some(vec![1, 2]));
        assert_eq!(summary.exceptions["bad row"].batch_number, 1);
        assert!(!summary.has_completed_without_error());
    }

    #[tokio::test]
    async fn test_extract_stops_when_cancelled() {
        let ctx = LinkContext::new("test");
        ctx.cancel.cancel("stop");

        let (tx, mut rx) = mpsc::channel::<Vec<u32>>(8);
        let mut block = Block::extract("read", IterExtractor::new(|| vec![1_u32, 2, 3]));
        block.connect(Box::new(tx)).unwrap();
        let summary = block.into_unit(&ctx).unwrap()().await;

        assert!(rx.recv().await.is_none());
        assert_eq!(summary.rows_extracted, 0);
        assert!(summary.has_completed_without_error());
    }

    struct StalledExtractor;

    impl Extractor<u32> for StalledExtractor {
        fn extract(&self, _cancel: Arc<CancellationToken>) -> BoxStream<'static, anyhow::Result<u32>> {
            futures::stream::iter(vec![Ok(1)])
                .chain(futures::stream::pending())
                .boxed()
        }
    }

    #[tokio::test]
    async fn test_cancel_interrupts_stalled_source() {
        let ctx = LinkContext::new("test");
        let cancel = ctx.cancel.clone();
        let (tx, mut rx) = mpsc::channel::<Vec<u32>>(8);
        let mut block = Block::extract("read", StalledExtractor);
        block.connect(Box::new(tx)).unwrap();
        let handle = tokio::spawn(block.into_unit(&ctx).unwrap()());

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        cancel.cancel("shutdown");

        let summary = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rx.recv().await, Some(vec![1]));
        assert_eq!(summary.rows_extracted, 1);
        assert!(summary.has_completed_without_error());
    }

    #[tokio::test]
    async fn test_extract_stops_when_downstream_closes() {
        let block = Block::extract("read", IterExtractor::new(|| (0..100).collect::<Vec<u32>>()))
            .with_options(BlockOptions::new().with_batch_size(1));
        let (unit, rx) = linked(block, 1);
        drop(rx);

        let summary = unit().await;
        assert_eq!(summary.total_batches, 1);
        assert!(summary.has_completed_without_error());
    }

    #[test]
    fn test_unconnected_extract_fails() {
        let block = Block::extract("read", IterExtractor::new(Vec::<u32>::new));
        let err = block.into_unit(&LinkContext::new("test")).err().unwrap();
        assert!(matches!(err, ConfigurationError::Connect { .. }));
    }
}
