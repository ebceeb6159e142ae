//! The per-invocation cancellation signal.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::debug;

/// Cooperative stop signal shared by the blocks of one pipeline invocation.
///
/// Blocks finish the batch in hand and take no further ones. Waiting for the
/// next record or batch is raced against [`cancelled`](Self::cancelled), so a
/// stalled source does not hold a cancelled pipeline open. Only the first
/// reason is kept.
#[derive(Default)]
pub struct CancellationToken {
    requested: AtomicBool,
    reason: Mutex<Option<String>>,
    wake: Notify,
}

impl CancellationToken {
    /// Creates a token that has not been cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Later calls are ignored.
    pub fn cancel(&self, reason: impl Into<String>) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        let reason = reason.into();
        debug!(reason = %reason, "Cancellation requested");
        *self.reason.lock() = Some(reason);
        self.wake.notify_waiters();
    }

    /// Returns true once cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Why the invocation was cancelled, if it was.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.lock().clone()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        loop {
            // Registered before the flag is read so a concurrent cancel
            // cannot slip between the check and the wait.
            let notified = self.wake.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
