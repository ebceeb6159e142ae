//! Transform blocks.

use super::{
    block_type_name, effective_options, BlockRecorder, BlockRuntime, LinkContext, Outlet,
    PortType, UnitOfWork,
};
use crate::cancellation::CancellationToken;
use crate::config::BlockOptions;
use crate::core::{BlockSummary, StageKind};
use crate::errors::ConfigurationError;
use async_trait::async_trait;
use futures::FutureExt;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::debug;

/// Maps one batch of records to another.
///
/// Called once per incoming batch. A returned error is recorded against that
/// batch and nothing is forwarded for it.
#[async_trait]
pub trait Transformer<T, U>: Send + Sync {
    /// Transforms a batch.
    async fn transform(&self, batch: Vec<T>) -> anyhow::Result<Vec<U>>;
}

/// A transformer backed by a synchronous batch function.
pub struct FnTransformer<F, T, U> {
    func: F,
    _types: PhantomData<fn(T) -> U>,
}

impl<F, T, U> FnTransformer<F, T, U>
where
    F: Fn(Vec<T>) -> anyhow::Result<Vec<U>> + Send + Sync,
{
    /// Creates a new batch transformer.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T, U> Transformer<T, U> for FnTransformer<F, T, U>
where
    F: Fn(Vec<T>) -> anyhow::Result<Vec<U>> + Send + Sync,
    T: Send + 'static,
    U: Send + 'static,
{
    async fn transform(&self, batch: Vec<T>) -> anyhow::Result<Vec<U>> {
        (self.func)(batch)
    }
}

/// A transformer applying a fallible function to every record.
///
/// The first failing record fails the whole batch.
pub struct MapTransformer<F, T, U> {
    func: F,
    _types: PhantomData<fn(T) -> U>,
}

impl<F, T, U> MapTransformer<F, T, U>
where
    F: Fn(T) -> anyhow::Result<U> + Send + Sync,
{
    /// Creates a new per-record transformer.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _types: PhantomData,
        }
    }
}

#[async_trait]
impl<F, T, U> Transformer<T, U> for MapTransformer<F, T, U>
where
    F: Fn(T) -> anyhow::Result<U> + Send + Sync,
    T: Send + 'static,
    U: Send + 'static,
{
    async fn transform(&self, batch: Vec<T>) -> anyhow::Result<Vec<U>> {
        batch.into_iter().map(&self.func).collect()
    }
}

pub(crate) struct TransformBlock<T, U> {
    name: String,
    transformer: Arc<dyn Transformer<T, U>>,
    options: Option<BlockOptions>,
    inlet: Option<mpsc::Receiver<Vec<T>>>,
    outlet: Option<mpsc::Sender<Vec<U>>>,
}

impl<T: Send + 'static, U: Send + 'static> TransformBlock<T, U> {
    pub(crate) fn new(name: impl Into<String>, transformer: Arc<dyn Transformer<T, U>>) -> Self {
        Self {
            name: name.into(),
            transformer,
            options: None,
            inlet: None,
            outlet: None,
        }
    }
}

impl<T: Send + 'static, U: Send + 'static> BlockRuntime for TransformBlock<T, U> {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Transform
    }

    fn type_name(&self) -> String {
        block_type_name::<Self>()
    }

    fn produces(&self) -> Option<PortType> {
        Some(PortType::of::<U>())
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

    fn open_inlet(&mut self, capacity: usize) -> Option<Outlet> {
        let (tx, rx) = mpsc::channel::<Vec<T>>(capacity.max(1));
        self.inlet = Some(rx);
        Some(Box::new(tx))
    }

    fn connect(&mut self, outlet: Outlet) -> Result<(), String> {
        let sender = outlet
            .downcast::<mpsc::Sender<Vec<U>>>()
            .map_err(|_| format!("successor does not accept {}", PortType::of::<U>()))?;
        self.outlet = Some(*sender);
        Ok(())
    }

    fn into_unit(self: Box<Self>, ctx: &LinkContext) -> Result<UnitOfWork, ConfigurationError> {
        let options = effective_options(self.options.as_ref(), ctx);
        let cancel = ctx.cancel.clone();
        let TransformBlock {
            name,
            transformer,
            inlet,
            outlet,
            ..
        } = *self;
        let (Some(inlet), Some(outlet)) = (inlet, outlet) else {
            return Err(ConfigurationError::Connect {
                position: 0,
                type_name: block_type_name::<Self>(),
                reason: format!("transform block '{name}' is missing a neighbour"),
            });
        };

        Ok(Box::new(move || {
            run_transform(name, transformer, inlet, outlet, options, cancel).boxed()
        }))
    }
}

async fn run_transform<T: Send + 'static, U: Send + 'static>(
    name: String,
    transformer: Arc<dyn Transformer<T, U>>,
    mut inlet: mpsc::Receiver<Vec<T>>,
    outlet: mpsc::Sender<Vec<U>>,
    options: BlockOptions,
    cancel: Arc<CancellationToken>,
) -> BlockSummary {
    let recorder = BlockRecorder::new(&name, StageKind::Transform, options.max_exceptions);

    while !recorder.should_stop(&cancel) {
        let batch = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            batch = inlet.recv() => batch,
        };
        let Some(batch) = batch else {
            break;
        };
        if recorder.should_stop(&cancel) {
            break;
        }

        let number = recorder.next_batch();
        match transformer.transform(batch).await {
            Ok(output) => {
                let rows = output.len() as u64;
                recorder.update(|s| s.rows_transformed += rows);
                if output.is_empty() {
                    continue;
                }
                if outlet.send(output).await.is_err() {
                    debug!(block = %name, batch = number, "Downstream block stopped");
                    break;
                }
            }
            Err(error) => {
                recorder.record_failure(&error, number);
            }
        }
    }

    // Closing the inlet stops the upstream block on its next send.
    inlet.close();
    recorder.finish()
}
