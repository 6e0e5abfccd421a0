pub mod postgres;
pub mod sqlite;
pub mod trait_def;

use std::time::Duration;

pub use postgres::PostgresStorage;
pub use sqlite::SqliteStorage;
pub use trait_def::{Storage, StorageError, StorageResult};

/// Sizing for the connection pool shared by all request handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub min_connections: u32,
    pub max_connections: u32,
    /// How long an acquire waits on an exhausted pool before failing
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            min_connections: 1,
            max_connections: 20,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}
