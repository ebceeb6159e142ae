//! Parameterised and paginated extraction through a [`QueryConnector`].

use super::Extractor;
use crate::cancellation::CancellationToken;
use crate::connectors::{Parameters, QueryConnector};
use crate::errors::{ConfigurationError, EtlflowError};
use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// What the last query returned, handed to [`Pagination::next_page`].
#[derive(Debug, Clone, PartialEq)]
pub struct PageInfo {
    /// 1-based page number.
    pub page: usize,
    /// Rows returned by the page.
    pub rows: usize,
    /// The last record of the page, serialised.
    pub last_record: Option<Value>,
}

/// Advances query parameters from one page to the next.
pub trait Pagination: Send + Sync {
    /// Parameters for the first page.
    fn first_page(&self, base: &Parameters) -> Parameters;

    /// Parameters for the page after `page`, or `None` when done.
    fn next_page(&self, current: &Parameters, page: &PageInfo) -> Option<Parameters>;
}

/// Offset/limit pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetPagination {
    page_size: usize,
    offset_key: String,
    limit_key: String,
}

impl OffsetPagination {
    /// Pages of `page_size` rows using `offset` and `limit` parameters.
    #[must_use]
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            offset_key: "offset".to_string(),
            limit_key: "limit".to_string(),
        }
    }

    /// Renames the parameters.
    #[must_use]
    pub fn with_keys(mut self, offset_key: impl Into<String>, limit_key: impl Into<String>) -> Self {
        self.offset_key = offset_key.into();
        self.limit_key = limit_key.into();
        self
    }
}

impl Pagination for OffsetPagination {
    fn first_page(&self, base: &Parameters) -> Parameters {
        let mut params = base.clone();
        params.insert(self.offset_key.clone(), Value::from(0_u64));
        params.insert(self.limit_key.clone(), Value::from(self.page_size));
        params
    }

    fn next_page(&self, current: &Parameters, page: &PageInfo) -> Option<Parameters> {
        if page.rows < self.page_size {
            return None;
        }
        let offset = current
            .get(&self.offset_key)
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let mut params = current.clone();
        params.insert(
            self.offset_key.clone(),
            Value::from(offset + page.rows as u64),
        );
        Some(params)
    }
}

/// Keyset pagination on a record field.
///
/// The value of `field` in the last record of a page becomes the cursor
/// parameter of the next query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorPagination {
    field: String,
    page_size: usize,
    cursor_key: String,
    limit_key: String,
}

impl CursorPagination {
    /// Pages of `page_size` rows keyed on `field`.
    #[must_use]
    pub fn new(field: impl Into<String>, page_size: usize) -> Self {
        Self {
            field: field.into(),
            page_size: page_size.max(1),
            cursor_key: "cursor".to_string(),
            limit_key: "limit".to_string(),
        }
    }

    /// Renames the cursor parameter.
    #[must_use]
    pub fn with_cursor_key(mut self, key: impl Into<String>) -> Self {
        self.cursor_key = key.into();
        self
    }
}

impl Pagination for CursorPagination {
    fn first_page(&self, base: &Parameters) -> Parameters {
        let mut params = base.clone();
        params.remove(&self.cursor_key);
        params.insert(self.limit_key.clone(), Value::from(self.page_size));
        params
    }

    fn next_page(&self, current: &Parameters, page: &PageInfo) -> Option<Parameters> {
        if page.rows < self.page_size {
            return None;
        }
        let cursor = page.last_record.as_ref()?.get(&self.field)?.clone();
        let mut params = current.clone();
        params.insert(self.cursor_key.clone(), cursor);
        Some(params)
    }
}

type ParameterGenerator =
    Arc<dyn Fn() -> BoxFuture<'static, anyhow::Result<Vec<Parameters>>> + Send + Sync>;

/// The parameter sets an extractor is driven with, one query run per set.
#[derive(Clone)]
pub enum ParameterSource {
    /// A fixed list.
    Fixed(Vec<Parameters>),
    /// Produced asynchronously at the start of every run.
    Generated(ParameterGenerator),
}

impl ParameterSource {
    /// Wraps an async generator.
    pub fn generated<F>(generator: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, anyhow::Result<Vec<Parameters>>> + Send + Sync + 'static,
    {
        Self::Generated(Arc::new(generator))
    }

    async fn resolve(&self) -> anyhow::Result<Vec<Parameters>> {
        match self {
            Self::Fixed(sets) => Ok(sets.clone()),
            Self::Generated(generator) => generator().await,
        }
    }
}

impl Default for ParameterSource {
    fn default() -> Self {
        Self::Fixed(vec![Parameters::new()])
    }
}

impl fmt::Debug for ParameterSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(sets) => f.debug_tuple("Fixed").field(sets).finish(),
            Self::Generated(_) => f.write_str("Generated(..)"),
        }
    }
}

/// Extracts by running a query once per parameter set, page by page.
///
/// Queries run on a background task that feeds the block through a small
/// buffer, so the next page is fetched while the previous one is batched.
pub struct PagedExtractor<T> {
    name: String,
    connector: Option<Arc<dyn QueryConnector<T>>>,
    pagination: Option<Arc<dyn Pagination>>,
    parameters: ParameterSource,
    buffer: usize,
}

impl<T> PagedExtractor<T> {
    /// Creates an extractor that runs a single unpaged query.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            connector: None,
            pagination: None,
            parameters: ParameterSource::default(),
            buffer: 1024,
        }
    }

    /// Sets the connector.
    #[must_use]
    pub fn with_connector(mut self, connector: Arc<dyn QueryConnector<T>>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Sets the pagination strategy.
    #[must_use]
    pub fn with_pagination(mut self, pagination: impl Pagination + 'static) -> Self {
        self.pagination = Some(Arc::new(pagination));
        self
    }

    /// Sets the parameter sets to run with.
    #[must_use]
    pub fn with_parameters(mut self, parameters: ParameterSource) -> Self {
        self.parameters = parameters;
        self
    }

    /// Sets how many records may be fetched ahead of the block.
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }
}

impl<T> Extractor<T> for PagedExtractor<T>
where
    T: Serialize + Send + 'static,
{
    fn extract(&self, cancel: Arc<CancellationToken>) -> BoxStream<'static, anyhow::Result<T>> {
        let Some(connector) = self.connector.clone() else {
            let err = anyhow::anyhow!("extractor '{}' has no query connector", self.name);
            return stream::once(async move { Err(err) }).boxed();
        };

        let (tx, rx) = mpsc::channel(self.buffer);
        let job = QueryJob {
            name: self.name.clone(),
            connector,
            pagination: self.pagination.clone(),
            parameters: self.parameters.clone(),
            cancel,
            tx,
        };
        tokio::spawn(job.run());

        stream::unfold(rx, |mut rx| async move {
            let item = rx.recv().await?;
            Some((item, rx))
        })
        .boxed()
    }

    fn validate(&self, block: &str) -> Result<(), ConfigurationError> {
        if self.connector.is_none() {
            return Err(ConfigurationError::UnconfiguredConnector {
                block: block.to_string(),
                connector: "query".to_string(),
            });
        }
        Ok(())
    }
}

struct QueryJob<T> {
    name: String,
    connector: Arc<dyn QueryConnector<T>>,
    pagination: Option<Arc<dyn Pagination>>,
    parameters: ParameterSource,
    cancel: Arc<CancellationToken>,
    tx: mpsc::Sender<anyhow::Result<T>>,
}

impl<T: Serialize + Send + 'static> QueryJob<T> {
    async fn run(self) {
        let sets = match self.parameters.resolve().await {
            Ok(sets) => sets,
            Err(e) => {
                let _ = self.tx.send(Err(e.context("generating query parameters"))).await;
                return;
            }
        };
        debug!(extractor = %self.name, parameter_sets = sets.len(), "Starting queries");

        for base in sets {
            if self.cancel.is_cancelled() {
                return;
            }
            match self.run_set(&base).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    let _ = self.tx.send(Err(e)).await;
                    return;
                }
            }
        }
    }

    /// Runs every page of one parameter set. Returns false once the
    /// receiving block has gone away.
    async fn run_set(&self, base: &Parameters) -> anyhow::Result<bool> {
        let mut params = match &self.pagination {
            Some(pagination) => pagination.first_page(base),
            None => base.clone(),
        };
        let mut page = 1;

        loop {
            let rows = match self.connector.query(&params).await {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(extractor = %self.name, page, error = %e, "Query failed");
                    return Ok(self.tx.send(Err(e)).await.is_ok());
                }
            };
            if rows.is_empty() {
                return Ok(true);
            }

            let count = rows.len();
            let last_record = match (&self.pagination, rows.last()) {
                (Some(_), Some(last)) => Some(serde_json::to_value(last)?),
                _ => None,
            };
            for row in rows {
                if self.tx.send(Ok(row)).await.is_err() {
                    return Ok(false);
                }
            }

            let Some(pagination) = &self.pagination else {
                return Ok(true);
            };
            let info = PageInfo {
                page,
                rows: count,
                last_record,
            };
            let Some(next) = pagination.next_page(&params, &info) else {
                return Ok(true);
            };
            if next == params {
                return Err(EtlflowError::PaginationStalled {
                    extractor: self.name.clone(),
                    page,
                }
                .into());
            }
            if self.cancel.is_cancelled() {
                return Ok(false);
            }
            params = next;
            page += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::FutureExt;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize)]
    struct Row {
        id: u64,
    }

    struct RangeConnector {
        total: u64,
        calls: Mutex<Vec<Parameters>>,
    }

    impl RangeConnector {
        fn new(total: u64) -> Arc<Self> {
            Arc::new(Self {
                total,
                calls: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl QueryConnector<Row> for RangeConnector {
        async fn query(&self, parameters: &Parameters) -> anyhow::Result<Vec<Row>> {
            self.calls.lock().push(parameters.clone());
            let limit = parameters.get("limit").and_then(Value::as_u64).unwrap_or(self.total);
            let start = match (parameters.get("offset"), parameters.get("cursor")) {
                (Some(offset), _) => offset.as_u64().unwrap_or(0),
                (None, Some(cursor)) => cursor.as_u64().unwrap_or(0) + 1,
                (None, None) => 0,
            };
            let end = (start + limit).min(self.total);
            Ok((start..end).map(|id| Row { id }).collect())
        }
    }

    async fn collect(extractor: &PagedExtractor<Row>) -> Vec<anyhow::Result<Row>> {
        extractor
            .extract(Arc::new(CancellationToken::new()))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_offset_pagination_reads_everything() {
        let connector = RangeConnector::new(7);
        let extractor = PagedExtractor::new("rows")
            .with_connector(connector.clone())
            .with_pagination(OffsetPagination::new(3));

        let rows: Vec<u64> = collect(&extractor)
            .await
            .into_iter()
            .map(|r| r.unwrap().id)
            .collect();

        assert_eq!(rows, (0..7).collect::<Vec<_>>());
        // 3 + 3 + 1: the short page ends pagination without another query.
        assert_eq!(connector.calls.lock().len(), 3);
    }

    #[tokio::test]
    async fn test_cursor_pagination_stops_on_empty_page() {
        let connector = RangeConnector::new(4);
        let extractor = PagedExtractor::new("rows")
            .with_connector(connector.clone())
            .with_pagination(CursorPagination::new("id", 2));

        let rows = collect(&extractor).await;
        assert_eq!(rows.len(), 4);
        assert_eq!(connector.calls.lock().len(), 3);
        assert_eq!(connector.calls.lock()[1].get("cursor"), Some(&json!(1)));
    }

    struct StuckPagination;

    impl Pagination for StuckPagination {
        fn first_page(&self, base: &Parameters) -> Parameters {
            let mut params = base.clone();
            params.insert("limit".to_string(), json!(2));
            params
        }

        fn next_page(&self, current: &Parameters, _page: &PageInfo) -> Option<Parameters> {
            Some(current.clone())
        }
    }

    #[tokio::test]
    async fn test_unchanged_parameters_raise() {
        let extractor = PagedExtractor::new("rows")
            .with_connector(RangeConnector::new(10))
            .with_pagination(StuckPagination);

        let results = collect(&extractor).await;
        assert_eq!(results.len(), 3);
        let err = results.into_iter().last().unwrap().unwrap_err();
        assert!(err.to_string().contains("Pagination stalled for 'rows'"));
    }

    #[tokio::test]
    async fn test_generated_parameter_sets() {
        let connector = RangeConnector::new(5);
        let extractor = PagedExtractor::new("rows")
            .with_connector(connector.clone())
            .with_parameters(ParameterSource::generated(|| {
                async {
                    let mut first = Parameters::new();
                    first.insert("offset".to_string(), json!(0));
                    first.insert("limit".to_string(), json!(2));
                    let mut second = Parameters::new();
                    second.insert("offset".to_string(), json!(3));
                    second.insert("limit".to_string(), json!(2));
                    Ok::<_, anyhow::Error>(vec![first, second])
                }
                .boxed()
            }));

        let ids: Vec<u64> = collect(&extractor)
            .await
            .into_iter()
            .map(|r| r.unwrap().id)
            .collect();
        assert_eq!(ids, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_missing_connector_fails_validation() {
        let extractor = PagedExtractor::<Row>::new("rows");
        assert!(matches!(
            extractor.validate("extract_rows"),
            Err(ConfigurationError::UnconfiguredConnector { .. })
        ));
    }
}
