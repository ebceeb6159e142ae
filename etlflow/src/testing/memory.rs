//! An in-memory table usable as both query and write connector.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashSet;

use crate::blocks::record_fingerprint;
use crate::connectors::{LockRegistry, Parameters, QueryConnector, WriteConnector};

/// A table of records kept in memory.
///
/// Queries honour `offset` and `limit` parameters. Writers take the table's
/// write lock from the [`LockRegistry`], readers its read lock.
#[derive(Debug)]
pub struct MemoryConnector<T> {
    table: String,
    key_fields: Vec<String>,
    rows: Mutex<Vec<T>>,
    locks: LockRegistry,
}

impl<T> MemoryConnector<T> {
    /// Creates an empty table keyed on `key_fields`.
    pub fn new<I, S>(table: impl Into<String>, key_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            table: table.into(),
            key_fields: key_fields.into_iter().map(Into::into).collect(),
            rows: Mutex::new(Vec::new()),
            locks: LockRegistry::new(),
        }
    }

    /// Seeds the table.
    #[must_use]
    pub fn with_rows(self, rows: Vec<T>) -> Self {
        *self.rows.lock() = rows;
        self
    }

    /// Shares a lock registry with other connectors.
    #[must_use]
    pub fn with_locks(mut self, locks: LockRegistry) -> Self {
        self.locks = locks;
        self
    }

    /// Number of stored rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.lock().len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.lock().is_empty()
    }
}

impl<T: Clone> MemoryConnector<T> {
    /// Returns a copy of the stored rows.
    #[must_use]
    pub fn rows(&self) -> Vec<T> {
        self.rows.lock().clone()
    }
}

impl<T: Serialize> MemoryConnector<T> {
    fn key_of(&self, record: &T) -> anyhow::Result<String> {
        Ok(record_fingerprint(&serde_json::to_value(record)?, &self.key_fields))
    }
}

#[async_trait]
impl<T> QueryConnector<T> for MemoryConnector<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn query(&self, parameters: &Parameters) -> anyhow::Result<Vec<T>> {
        let _guard = self.locks.read(&self.table).await;
        let offset = parameters.get("offset").and_then(Value::as_u64).unwrap_or(0);
        let limit = parameters.get("limit").and_then(Value::as_u64);

        let rows = self.rows.lock();
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX));
        Ok(rows.iter().skip(skip).take(take).cloned().collect())
    }
}

#[async_trait]
impl<T> WriteConnector<T> for MemoryConnector<T>
where
    T: Serialize + Clone + Send + Sync + 'static,
{
    async fn find(
        &self,
        candidates: &[T],
        key_fields: &[String],
        _compare_fields: &[String],
    ) -> anyhow::Result<Vec<Value>> {
        let _guard = self.locks.read(&self.table).await;
        let wanted = candidates
            .iter()
            .map(|c| -> anyhow::Result<String> {
                Ok(record_fingerprint(&serde_json::to_value(c)?, key_fields))
            })
            .collect::<anyhow::Result<HashSet<String>>>()?;

        let mut found = Vec::new();
        for row in self.rows.lock().iter() {
            let value = serde_json::to_value(row)?;
            if wanted.contains(&record_fingerprint(&value, key_fields)) {
                found.push(value);
            }
        }
        Ok(found)
    }

    async fn insert(&self, records: Vec<T>) -> anyhow::Result<u64> {
        let _guard = self.locks.write(&self.table).await;
        let count = records.len() as u64;
        self.rows.lock().extend(records);
        Ok(count)
    }

    async fn update(&self, records: Vec<T>, _key_fields: &[String]) -> anyhow::Result<u64> {
        let _guard = self.locks.write(&self.table).await;
        let mut updated = 0;
        let mut rows = self.rows.lock();
        for record in records {
            let key = self.key_of(&record)?;
            for row in rows.iter_mut() {
                if self.key_of(row)? == key {
                    *row = record.clone();
                    updated += 1;
                    break;
                }
            }
        }
        Ok(updated)
    }
}
