//! Keyed resource locks for connectors.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

/// A registry of named async read/write locks.
///
/// Locks are created on first use and live as long as the registry. The
/// pipeline runtime never takes these locks; connectors sharing a table or
/// file use them to serialise writers against readers.
#[derive(Debug, Default, Clone)]
pub struct LockRegistry {
    locks: Arc<DashMap<String, Arc<RwLock<()>>>>,
}

impl LockRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the lock for `key`, creating it if needed.
    #[must_use]
    pub fn lock_for(&self, key: &str) -> Arc<RwLock<()>> {
        self.locks
            .entry(key.to_string())
            .or_insert_with(|| {
                trace!(key, "Creating resource lock");
                Arc::new(RwLock::new(()))
            })
            .clone()
    }

    /// Acquires shared access to `key`.
    pub async fn read(&self, key: &str) -> OwnedRwLockReadGuard<()> {
        self.lock_for(key).read_owned().await
    }

    /// Acquires exclusive access to `key`.
    pub async fn write(&self, key: &str) -> OwnedRwLockWriteGuard<()> {
        self.lock_for(key).write_owned().await
    }

    /// Number of keys seen so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Returns true if no lock was ever requested.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}
