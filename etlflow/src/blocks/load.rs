//! Load blocks.

use super::{
    block_type_name, effective_options, BlockRecorder, BlockRuntime, LinkContext, Outlet,
    PortType, UnitOfWork,
};
use crate::cancellation::CancellationToken;
use crate::config::BlockOptions;
use crate::core::{BlockSummary, StageKind};
use crate::errors::ConfigurationError;
use async_trait::async_trait;
use futures::future::join_all;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::ops::AddAssign;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, error};

/// Rows written by one call to [`Loader::load`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadCounts {
    /// Rows inserted.
    pub inserted: u64,
    /// Rows updated.
    pub updated: u64,
}

impl LoadCounts {
    /// Counts for a batch that was inserted in full.
    #[must_use]
    pub fn inserted(rows: u64) -> Self {
        Self {
            inserted: rows,
            updated: 0,
        }
    }
}

impl AddAssign for LoadCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.inserted += rhs.inserted;
        self.updated += rhs.updated;
    }
}

/// A sink for records.
///
/// With more than one worker, `load` is called concurrently for different
/// batches.
#[async_trait]
pub trait Loader<T>: Send + Sync {
    /// Writes a batch and reports what was written.
    async fn load(&self, batch: Vec<T>) -> anyhow::Result<LoadCounts>;

    /// Checks that the loader is fully configured.
    fn validate(&self, _block: &str) -> Result<(), ConfigurationError> {
        Ok(())
    }
}

type SharedInlet<T> = Arc<Mutex<mpsc::Receiver<Vec<T>>>>;

pub(crate) struct LoadBlock<T> {
    name: String,
    loader: Arc<dyn Loader<T>>,
    options: Option<BlockOptions>,
    inlet: Option<mpsc::Receiver<Vec<T>>>,
}

impl<T: Send + 'static> LoadBlock<T> {
    pub(crate) fn new(name: impl Into<String>, loader: Arc<dyn Loader<T>>) -> Self {
        Self {
            name: name.into(),
            loader,
            options: None,
            inlet: None,
        }
    }
}

impl<T: Send + 'static> BlockRuntime for LoadBlock<T> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Load
    }

    fn type_name(&self) -> String {
        block_type_name::<Self>()
    }

    fn consumes(&self) -> Option<PortType> {
        Some(PortType::of::<T>())
    }

    fn options(&self) -> Option<&BlockOptions> {
        self.options.as_ref()
    }

    fn set_options(&mut self, options: BlockOptions) {
        self.options = Some(options);
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        self.loader.validate(&self.name)
    }

    fn open_inlet(&mut self, capacity: usize) -> Option<Outlet> {
        let (tx, rx) = mpsc::channel::<Vec<T>>(capacity.max(1));
        self.inlet = Some(rx);
        Some(Box::new(tx))
    }

    fn into_unit(self: Box<Self>, ctx: &LinkContext) -> Result<UnitOfWork, ConfigurationError> {
        self.validate()?;
        let options = effective_options(self.options.as_ref(), ctx);
        let cancel = ctx.cancel.clone();
        let LoadBlock {
            name,
            loader,
            inlet,
            ..
        } = *self;
        let inlet = inlet.ok_or_else(|| ConfigurationError::Connect {
            position: 0,
            type_name: block_type_name::<Self>(),
            reason: format!("load block '{name}' has no upstream block"),
        })?;

        Ok(Box::new(move || {
            run_load(name, loader, inlet, options, cancel).boxed()
        }))
    }
}

async fn run_load<T: Send + 'static>(
    name: String,
    loader: Arc<dyn Loader<T>>,
    inlet: mpsc::Receiver<Vec<T>>,
    options: BlockOptions,
    cancel: Arc<CancellationToken>,
) -> BlockSummary {
    let recorder = Arc::new(BlockRecorder::new(
        &name,
        StageKind::Load,
        options.max_exceptions,
    ));
    let inlet: SharedInlet<T> = Arc::new(Mutex::new(inlet));

    let workers = (0..options.workers.max(1)).map(|worker| {
        tokio::spawn(load_worker(
            worker,
            loader.clone(),
            inlet.clone(),
            recorder.clone(),
            cancel.clone(),
        ))
    });

    for joined in join_all(workers).await {
        if let Err(e) = joined {
            error!(block = %name, error = %e, "Load worker terminated abnormally");
            recorder.record_failure(&anyhow::anyhow!("load worker failed: {e}"), 0);
        }
    }

    inlet.lock().await.close();
    recorder.finish()
}

async fn load_worker<T: Send + 'static>(
    worker: usize,
    loader: Arc<dyn Loader<T>>,
    inlet: SharedInlet<T>,
    recorder: Arc<BlockRecorder>,
    cancel: Arc<CancellationToken>,
) {
    loop {
        if recorder.should_stop(&cancel) {
            break;
        }
        let Some(permit) = recorder.reserve().await else {
            break;
        };
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => None,
            batch = async { inlet.lock().await.recv().await } => batch,
        };
        let Some(batch) = next else {
            break;
        };
        if recorder.should_stop(&cancel) {
            break;
        }

        let number = recorder.next_batch();
        match loader.load(batch).await {
            Ok(counts) => recorder.update(|s| {
                s.rows_inserted += counts.inserted;
                s.rows_updated += counts.updated;
            }),
            Err(error) => {
                if recorder.record_reserved_failure(&error, number, permit) {
                    // Refuse anything still queued so upstream blocks stop.
                    inlet.lock().await.close();
                }
            }
        }
    }
    debug!(worker, "Load worker finished");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::Block;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingLoader {
        calls: AtomicUsize,
        fail_from: usize,
    }

    #[async_trait]
    impl Loader<u32> for CountingLoader {
        async fn load(&self, batch: Vec<u32>) -> anyhow::Result<LoadCounts> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.fail_from {
                anyhow::bail!("write {call} rejected");
            }
            Ok(LoadCounts::inserted(batch.len() as u64))
        }
    }

    fn linked(block: Block) -> (UnitOfWork, mpsc::Sender<Vec<u32>>) {
        let mut block = block;
        let inlet = block.open_inlet(16).unwrap();
        let unit = block.into_unit(&LinkContext::new("test")).unwrap();
        (unit, *inlet.downcast::<mpsc::Sender<Vec<u32>>>().unwrap())
    }

    #[tokio::test]
    async fn test_load_counts_rows() {
        let loader = CountingLoader {
            calls: AtomicUsize::new(0),
            fail_from: usize::MAX,
        };
        let (unit, tx) = linked(Block::load("write", loader));
        tx.send(vec![1, 2, 3]).await.unwrap();
        tx.send(vec![4]).await.unwrap();
        drop(tx);

        let summary = unit().await;
        assert_eq!(summary.rows_inserted, 4);
        assert_eq!(summary.total_batches, 2);
        assert!(summary.has_completed_without_error());
    }

    #[tokio::test]
    async fn test_load_stops_after_error_budget() {
        let loader = CountingLoader {
            calls: AtomicUsize::new(0),
            fail_from: 1,
        };
        let (unit, tx) = linked(Block::load("write", loader));
        for n in 0..4 {
            tx.send(vec![n]).await.unwrap();
        }

        let summary = unit().await;
        assert_eq!(summary.exceptions.len(), 3);
        assert_eq!(summary.total_batches, 3);
        assert_eq!(summary.exceptions["write 3 rejected"].batch_number, 3);
        assert!(tx.send(vec![9]).await.is_err());
    }

    #[tokio::test]
    async fn test_load_with_several_workers() {
        let loader = CountingLoader {
            calls: AtomicUsize::new(0),
            fail_from: usize::MAX,
        };
        let (unit, tx) =
            linked(Block::load("write", loader).with_options(BlockOptions::new().with_workers(4)));
        let handle = tokio::spawn(unit());
        for n in 0..20 {
            tx.send(vec![n, n]).await.unwrap();
        }
        drop(tx);

        let summary = handle.await.unwrap();
        assert_eq!(summary.rows_inserted, 40);
        assert_eq!(summary.total_batches, 20);
    }

    struct SlowFailingLoader {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Loader<u32> for SlowFailingLoader {
        async fn load(&self, batch: Vec<u32>) -> anyhow::Result<LoadCounts> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            anyhow::bail!("batch {:?} rejected", batch)
        }
    }

    #[tokio::test]
    async fn test_error_budget_holds_with_several_workers() {
        let calls = Arc::new(AtomicUsize::new(0));
        let loader = SlowFailingLoader {
            calls: calls.clone(),
        };
        let (unit, tx) = linked(
            Block::load("write", loader)
                .with_options(BlockOptions::new().with_workers(4).with_max_exceptions(3)),
        );
        for n in 0..4 {
            tx.send(vec![n]).await.unwrap();
        }

        let summary = unit().await;
        assert_eq!(summary.exceptions.len(), 3);
        assert_eq!(summary.total_batches, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(!summary.has_completed_without_error());
        assert!(tx.send(vec![9]).await.is_err());
    }

    #[tokio::test]
    async fn test_idle_workers_stop_on_cancel() {
        let ctx = LinkContext::new("test");
        let mut block = Block::load(
            "write",
            CountingLoader {
                calls: AtomicUsize::new(0),
                fail_from: usize::MAX,
            },
        )
        .with_options(BlockOptions::new().with_workers(3));
        let inlet = block.open_inlet(4).unwrap();
        let handle = tokio::spawn(block.into_unit(&ctx).unwrap()());

        let tx = *inlet.downcast::<mpsc::Sender<Vec<u32>>>().unwrap();
        tx.send(vec![1, 2]).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        ctx.cancel.cancel("shutdown");

        let summary = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.rows_inserted, 2);
        assert!(summary.has_completed_without_error());
    }

    #[test]
    fn test_load_counts_add() {
        let mut counts = LoadCounts::inserted(2);
        counts += LoadCounts {
            inserted: 1,
            updated: 4,
        };
        assert_eq!(counts, LoadCounts { inserted: 3, updated: 4 });
    }
}
