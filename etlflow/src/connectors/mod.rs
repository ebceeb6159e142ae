//! Connector boundary.
//!
//! Concrete database, file, and HTTP connectors live outside this crate. The
//! traits here are the seams the built-in extract and load blocks call into,
//! and [`LockRegistry`] is offered to implementations that need keyed locking
//! around a shared resource.

mod locks;

pub use locks::LockRegistry;

use async_trait::async_trait;
use serde_json::Value;

/// Named query parameters.
pub type Parameters = serde_json::Map<String, Value>;

/// Reads records with a parameterised query.
#[async_trait]
pub trait QueryConnector<T>: Send + Sync {
    /// Runs the query once with the given parameters.
    async fn query(&self, parameters: &Parameters) -> anyhow::Result<Vec<T>>;
}

/// Writes records and looks up rows that already exist.
#[async_trait]
pub trait WriteConnector<T>: Send + Sync {
    /// Returns the stored rows matching `candidates` on `key_fields`.
    ///
    /// Each row is a JSON object holding at least the key and compare fields.
    async fn find(
        &self,
        candidates: &[T],
        key_fields: &[String],
        compare_fields: &[String],
    ) -> anyhow::Result<Vec<Value>>;

    /// Inserts new records and returns the number of rows written.
    async fn insert(&self, records: Vec<T>) -> anyhow::Result<u64>;

    /// Updates existing records matched on `key_fields`.
    async fn update(&self, records: Vec<T>, key_fields: &[String]) -> anyhow::Result<u64>;
}
