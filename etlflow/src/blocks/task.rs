//! Task blocks: side effects without a data connection.

use super::{block_type_name, BlockRecorder, BlockRuntime, LinkContext, UnitOfWork};
use crate::cancellation::CancellationToken;
use crate::config::BlockOptions;
use crate::core::StageKind;
use crate::errors::ConfigurationError;
use async_trait::async_trait;
use futures::FutureExt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// A side effect run once per invocation, inside a chain or as a pre/post task.
#[async_trait]
pub trait TaskAction: Send + Sync {
    /// Runs the task.
    async fn run(&self, cancel: Arc<CancellationToken>) -> anyhow::Result<()>;
}

/// A task backed by an async closure.
pub struct FnTask<F, Fut> {
    func: F,
    _future: PhantomData<fn() -> Fut>,
}

impl<F, Fut> FnTask<F, Fut>
where
    F: Fn(Arc<CancellationToken>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    /// Creates a task from an async closure.
    pub fn new(func: F) -> Self {
        Self {
            func,
            _future: PhantomData,
        }
    }
}

#[async_trait]
impl<F, Fut> TaskAction for FnTask<F, Fut>
where
    F: Fn(Arc<CancellationToken>) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn run(&self, cancel: Arc<CancellationToken>) -> anyhow::Result<()> {
        (self.func)(cancel).await
    }
}

pub(crate) struct TaskBlock {
    name: String,
    action: Arc<dyn TaskAction>,
    options: Option<BlockOptions>,
}

impl TaskBlock {
    pub(crate) fn new(name: impl Into<String>, action: Arc<dyn TaskAction>) -> Self {
        Self {
            name: name.into(),
            action,
            options: None,
        }
    }
}

impl BlockRuntime for TaskBlock {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> StageKind {
        StageKind::Task
    }

    fn type_name(&self) -> String {
        block_type_name::<Self>()
    }

    fn options(&self) -> Option<&BlockOptions> {
        self.options.as_ref()
    }

    fn set_options(&mut self, options: BlockOptions) {
        self.options = Some(options);
    }

    fn into_unit(self: Box<Self>, ctx: &LinkContext) -> Result<UnitOfWork, ConfigurationError> {
        let cancel = ctx.cancel.clone();
        let TaskBlock { name, action, .. } = *self;
        Ok(Box::new(move || {
            async move {
                let recorder = BlockRecorder::new(&name, StageKind::Task, 1);
                if cancel.is_cancelled() {
                    return recorder.finish();
                }
                let number = recorder.next_batch();
                if let Err(error) = action.run(cancel).await {
                    recorder.record_failure(&error, number);
                }
                recorder.finish()
            }
            .boxed()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::Block;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[tokio::test]
    async fn test_task_runs_once() {
        let ran = Arc::new(AtomicBool::new(false));
        let flag = ran.clone();
        let block = Block::task(
            "refresh",
            FnTask::new(move |_| {
                let flag = flag.clone();
                async move {
                    flag.store(true, Ordering::SeqCst);
                    Ok::<_, anyhow::Error>(())
                }
            }),
        );

        let summary = block.into_unit(&LinkContext::new("test")).unwrap()().await;
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(summary.total_batches, 1);
        assert!(summary.has_completed_without_error());
    }

    #[tokio::test]
    async fn test_task_failure_is_recorded() {
        let block = Block::task(
            "refresh",
            FnTask::new(|_| async { Err::<(), _>(anyhow::anyhow!("view refresh failed")) }),
        );

        let summary = block.into_unit(&LinkContext::new("test")).unwrap()().await;
        assert_eq!(summary.exceptions["view refresh failed"].batch_number, 1);
    }
}
