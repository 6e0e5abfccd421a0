use crate::models::{NewVisit, Visit, VisitLog};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("timed out waiting for a pooled database connection")]
    PoolExhausted,
    #[error(transparent)]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StorageError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => StorageError::PoolExhausted,
            other => StorageError::Database(other),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

/// Append-only visit log.
///
/// Each call borrows one connection from the backend's pool for its
/// duration and returns it before completing, on success or error.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Create the visits table if it does not exist yet.
    ///
    /// Runs the DDL at most once per storage instance; later calls are no-ops.
    /// A table dropped after that first success is not recreated until the
    /// storage is rebuilt, and queries against it fail in the meantime.
    async fn ensure_schema(&self) -> StorageResult<()>;

    /// Append one visit and return it with its assigned id
    async fn record_visit(
        &self,
        ip: &str,
        user_agent: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Visit>;

    /// Up to `limit` visits, newest first. Visits sharing a timestamp are
    /// ordered by id, newest first.
    async fn recent_visits(&self, limit: i64) -> StorageResult<Vec<Visit>>;

    /// Number of stored visits whose ip is a masked IPv4 address
    async fn count_masked_ipv4(&self) -> StorageResult<i64>;

    /// Ensure the schema, record `visit`, then read back the `limit` most
    /// recent visits and the masked IPv4 count, all on a single connection.
    async fn log_visit(&self, visit: &NewVisit, limit: i64) -> StorageResult<VisitLog>;
}
