//! Insert-or-update loading through a [`WriteConnector`].

use super::{LoadCounts, Loader};
use crate::connectors::WriteConnector;
use crate::errors::ConfigurationError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// Computes a stable fingerprint over selected fields of a JSON record.
///
/// Missing fields hash the same as explicit nulls, so a stored row and a
/// candidate compare equal when both lack a field.
#[must_use]
pub fn record_fingerprint(record: &Value, fields: &[String]) -> String {
    let mut projected = serde_json::Map::new();
    for field in fields {
        let value = record.get(field).cloned().unwrap_or(Value::Null);
        projected.insert(field.clone(), value);
    }

    let json = serde_json::to_string(&Value::Object(projected)).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..16])
}

/// Loads records by inserting new keys and updating changed ones.
///
/// For every batch the connector is asked which candidates already exist.
/// Candidates with an unknown key are inserted; candidates whose compare-field
/// fingerprint differs from the stored row are updated; the rest are skipped.
pub struct UpsertLoader<T> {
    key_fields: Vec<String>,
    compare_fields: Vec<String>,
    connector: Option<Arc<dyn WriteConnector<T>>>,
}

impl<T> UpsertLoader<T> {
    /// Creates a loader matching records on `key_fields`.
    pub fn new<I, S>(key_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            key_fields: key_fields.into_iter().map(Into::into).collect(),
            compare_fields: Vec::new(),
            connector: None,
        }
    }

    /// Sets the fields whose change triggers an update.
    #[must_use]
    pub fn with_compare_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.compare_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the connector used for lookups and writes.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn WriteConnector<T>>) -> Self {
        self.connector = Some(connector);
        self
    }
}

impl<T> fmt::Debug for UpsertLoader<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpsertLoader")
            .field("key_fields", &self.key_fields)
            .field("compare_fields", &self.compare_fields)
            .field("has_connector", &self.connector.is_some())
            .finish()
    }
}

#[async_trait]
impl<T> Loader<T> for UpsertLoader<T>
where
    T: Serialize + Send + Sync + 'static,
{
    async fn load(&self, batch: Vec<T>) -> anyhow::Result<LoadCounts> {
        let connector = self
            .connector
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("upsert loader has no write connector"))?;

        let stored = connector
            .find(&batch, &self.key_fields, &self.compare_fields)
            .await?;
        let existing: HashMap<String, String> = stored
            .iter()
            .map(|row| {
                (
                    record_fingerprint(row, &self.key_fields),
                    record_fingerprint(row, &self.compare_fields),
                )
            })
            .collect();

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        for record in batch {
            let value = serde_json::to_value(&record)?;
            let key = record_fingerprint(&value, &self.key_fields);
            match existing.get(&key) {
                None => inserts.push(record),
                Some(previous) if *previous != record_fingerprint(&value, &self.compare_fields) => {
                    updates.push(record);
                }
                Some(_) => trace!(key = %key, "Record unchanged, skipping"),
            }
        }

        let mut counts = LoadCounts::default();
        if !inserts.is_empty() {
            counts.inserted = connector.insert(inserts).await?;
        }
        if !updates.is_empty() {
            counts.updated = connector.update(updates, &self.key_fields).await?;
        }
        Ok(counts)
    }

    fn validate(&self, block: &str) -> Result<(), ConfigurationError> {
        if self.connector.is_none() {
            return Err(ConfigurationError::UnconfiguredConnector {
                block: block.to_string(),
                connector: "write".to_string(),
            });
        }
        Ok(())
    }
}
