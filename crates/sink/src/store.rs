//! Relational sink interface with bounded reconnect-and-retry

use async_trait::async_trait;
use parking_lot::Mutex;
use std::fmt;

use crate::SinkError;

/// A bound parameter, or the server-side clock
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Text(String),
    /// Rendered inline as `NOW()`, never bound
    Now,
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(SqlValue::Null, SqlValue::Text)
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

/// A single-row `INSERT` with positional `?` placeholders
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<(String, SqlValue)>,
}

impl InsertStatement {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
        }
    }

    #[must_use]
    pub fn column(mut self, name: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.columns.push((name.into(), value.into()));
        self
    }

    /// The statement text
    #[must_use]
    pub fn sql(&self) -> String {
        let names: Vec<String> = self
            .columns
            .iter()
            .map(|(name, _)| format!("`{name}`"))
            .collect();
        let values: Vec<&str> = self
            .columns
            .iter()
            .map(|(_, value)| match value {
                SqlValue::Now => "NOW()",
                _ => "?",
            })
            .collect();
        format!(
            "INSERT INTO `{}` ({}) VALUES ({})",
            self.table,
            names.join(", "),
            values.join(", ")
        )
    }

    /// Values bound to the placeholders, in order
    #[must_use]
    pub fn params(&self) -> Vec<&SqlValue> {
        self.columns
            .iter()
            .map(|(_, value)| value)
            .filter(|value| **value != SqlValue::Now)
            .collect()
    }

    /// Look up a column value by name
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreErrorKind {
    /// The connection is gone; reconnecting may help
    Connection,
    /// The statement itself failed
    Query,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl fmt::Display for StoreErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreErrorKind::Connection => f.write_str("connection"),
            StoreErrorKind::Query => f.write_str("query"),
        }
    }
}

impl StoreError {
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Connection,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn query(message: impl Into<String>) -> Self {
        Self {
            kind: StoreErrorKind::Query,
            message: message.into(),
        }
    }
}

/// A relational database the persisting handler writes to
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Run one statement and commit it
    async fn execute(&self, statement: &InsertStatement) -> Result<(), StoreError>;

    /// Drop the current connection and open a new one
    async fn reconnect(&self) -> Result<(), StoreError>;
}

/// Wraps a store so that connection failures are retried after a
/// reconnect, at most `max_retries` times per statement
pub struct RetryingStore<S> {
    inner: S,
    max_retries: u32,
}

impl<S: RecordStore> RetryingStore<S> {
    pub fn new(inner: S, max_retries: u32) -> Self {
        Self { inner, max_retries }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub async fn execute(&self, statement: &InsertStatement) -> Result<(), SinkError> {
        let mut retries = 0;
        loop {
            let err = match self.inner.execute(statement).await {
                Ok(()) => return Ok(()),
                Err(err) if err.kind == StoreErrorKind::Query => return Err(SinkError::Store(err)),
                Err(err) => err,
            };

            if retries >= self.max_retries {
                tracing::error!(
                    table = %statement.table,
                    attempts = retries + 1,
                    error = %err,
                    "query failed, no retries remaining"
                );
                return Err(SinkError::RetriesExhausted {
                    attempts: retries + 1,
                    source: err,
                });
            }
            retries += 1;
            tracing::warn!(
                table = %statement.table,
                retry = retries,
                max_retries = self.max_retries,
                error = %err,
                "query failed, refreshing database connection"
            );

            // A failed reconnect counts against the same budget
            if let Err(reconnect_err) = self.inner.reconnect().await {
                tracing::warn!(error = %reconnect_err, "database reconnect failed");
            }
        }
    }
}

/// In-memory store that records executed statements.
///
/// Connection failures can be scheduled with [`MemoryStore::fail_next`],
/// which makes it usable for dry runs and for exercising retry paths.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: Mutex<Vec<InsertStatement>>,
    failures: Mutex<u32>,
    reconnects: Mutex<u32>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` executions with a connection error
    pub fn fail_next(&self, count: u32) {
        *self.failures.lock() = count;
    }

    #[must_use]
    pub fn rows(&self) -> Vec<InsertStatement> {
        self.rows.lock().clone()
    }

    #[must_use]
    pub fn reconnects(&self) -> u32 {
        *self.reconnects.lock()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn execute(&self, statement: &InsertStatement) -> Result<(), StoreError> {
        {
            let mut failures = self.failures.lock();
            if *failures > 0 {
                *failures -= 1;
                return Err(StoreError::connection("server has gone away"));
            }
        }
        self.rows.lock().push(statement.clone());
        Ok(())
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        *self.reconnects.lock() += 1;
        Ok(())
    }
}

#[async_trait]
impl<S: RecordStore + ?Sized> RecordStore for std::sync::Arc<S> {
    async fn execute(&self, statement: &InsertStatement) -> Result<(), StoreError> {
        (**self).execute(statement).await
    }

    async fn reconnect(&self) -> Result<(), StoreError> {
        (**self).reconnect().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn feed_row() -> InsertStatement {
        InsertStatement::new("feed")
            .column("service", "icloud")
            .column("received", SqlValue::Now)
            .column("account_id", SqlValue::Integer(7))
            .column("device_id", SqlValue::Null)
            .column("body", "{}")
    }

    #[test]
    fn test_sql_rendering() {
        let row = feed_row();
        assert_eq!(
            row.sql(),
            "INSERT INTO `feed` (`service`, `received`, `account_id`, `device_id`, `body`) \
             VALUES (?, NOW(), ?, ?, ?)"
        );
        assert_eq!(
            row.params(),
            vec![
                &SqlValue::Text("icloud".into()),
                &SqlValue::Integer(7),
                &SqlValue::Null,
                &SqlValue::Text("{}".into()),
            ]
        );
        assert_eq!(row.value("account_id"), Some(&SqlValue::Integer(7)));
        assert_eq!(row.value("missing"), None);
    }

    #[tokio::test]
    async fn test_retry_once_after_connection_loss() {
        let store = Arc::new(MemoryStore::new());
        let retrying = RetryingStore::new(Arc::clone(&store), 1);
        store.fail_next(1);

        retrying.execute(&feed_row()).await.unwrap();

        assert_eq!(store.reconnects(), 1);
        assert_eq!(store.rows().len(), 1);
    }

    #[tokio::test]
    async fn test_exhausted_retries_are_fatal() {
        let store = Arc::new(MemoryStore::new());
        let retrying = RetryingStore::new(Arc::clone(&store), 1);
        store.fail_next(2);

        let err = retrying.execute(&feed_row()).await.unwrap_err();

        assert!(err.is_fatal());
        assert!(matches!(err, SinkError::RetriesExhausted { attempts: 2, .. }));
        assert_eq!(store.reconnects(), 1);
        assert!(store.rows().is_empty());
    }

    #[tokio::test]
    async fn test_zero_retries() {
        let store = Arc::new(MemoryStore::new());
        let retrying = RetryingStore::new(Arc::clone(&store), 0);
        store.fail_next(1);

        let err = retrying.execute(&feed_row()).await.unwrap_err();

        assert!(matches!(err, SinkError::RetriesExhausted { attempts: 1, .. }));
        assert_eq!(store.reconnects(), 0);
    }

    struct RejectingStore;

    #[async_trait]
    impl RecordStore for RejectingStore {
        async fn execute(&self, _statement: &InsertStatement) -> Result<(), StoreError> {
            Err(StoreError::query("unknown column"))
        }

        async fn reconnect(&self) -> Result<(), StoreError> {
            panic!("query errors must not reconnect");
        }
    }

    #[tokio::test]
    async fn test_query_errors_are_not_retried() {
        let retrying = RetryingStore::new(RejectingStore, 3);

        let err = retrying.execute(&feed_row()).await.unwrap_err();

        assert!(!err.is_fatal());
        assert!(matches!(err, SinkError::Store(_)));
    }
}
