use crate::masking::MASKED_IPV4_PATTERN;
use crate::models::{NewVisit, Visit, VisitLog, VisitRow};
use crate::storage::{PoolSettings, Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{SqliteConnection, SqlitePool};
use std::str::FromStr;
use tokio::sync::OnceCell;

pub struct SqliteStorage {
    pool: SqlitePool,
    schema_ready: OnceCell<()>,
}

impl SqliteStorage {
    /// Wrap an existing pool. Its connections must have been opened with
    /// `SqliteConnectOptions::with_regexp` for the masked IPv4 count to work.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
        }
    }

    pub async fn connect(database_url: &str, settings: &PoolSettings) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .with_regexp();

        let pool = SqlitePoolOptions::new()
            .min_connections(settings.min_connections)
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn ensure_schema_on(&self, conn: &mut SqliteConnection) -> StorageResult<()> {
        self.schema_ready
            .get_or_try_init(|| create_schema(conn))
            .await?;
        Ok(())
    }
}

async fn create_schema(conn: &mut SqliteConnection) -> Result<(), sqlx::Error> {
    // SQLite ignores VARCHAR lengths, so the bound is a CHECK here
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS visits (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            ip VARCHAR(50) NOT NULL CHECK (length(ip) <= 50),
            user_agent TEXT NOT NULL,
            ts TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_visits_ts ON visits(ts, id)")
        .execute(&mut *conn)
        .await?;

    tracing::debug!("visits table ready (sqlite)");
    Ok(())
}

async fn insert_visit(
    conn: &mut SqliteConnection,
    ip: &str,
    user_agent: &str,
    at: DateTime<Utc>,
) -> Result<Visit, sqlx::Error> {
    let row = sqlx::query_as::<_, VisitRow>(
        r#"
        INSERT INTO visits (ip, user_agent, ts)
        VALUES (?, ?, ?)
        RETURNING id, ip, user_agent, ts
        "#,
    )
    .bind(ip)
    .bind(user_agent)
    .bind(at.naive_utc())
    .fetch_one(&mut *conn)
    .await?;

    Ok(row.into())
}

async fn select_recent(conn: &mut SqliteConnection, limit: i64) -> Result<Vec<Visit>, sqlx::Error> {
    if limit <= 0 {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, VisitRow>(
        r#"
        SELECT id, ip, user_agent, ts
        FROM visits
        ORDER BY ts DESC, id DESC
        LIMIT ?
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(Visit::from).collect())
}

async fn select_masked_count(conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM visits WHERE ip REGEXP ?")
        .bind(MASKED_IPV4_PATTERN)
        .fetch_one(&mut *conn)
        .await?;

    Ok(count.0)
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn ensure_schema(&self) -> StorageResult<()> {
        if self.schema_ready.initialized() {
            return Ok(());
        }

        let mut conn = self.pool.acquire().await?;
        self.ensure_schema_on(&mut conn).await
    }

    async fn record_visit(
        &self,
        ip: &str,
        user_agent: &str,
        at: DateTime<Utc>,
    ) -> StorageResult<Visit> {
        let mut conn = self.pool.acquire().await?;
        Ok(insert_visit(&mut conn, ip, user_agent, at).await?)
    }

    async fn recent_visits(&self, limit: i64) -> StorageResult<Vec<Visit>> {
        let mut conn = self.pool.acquire().await?;
        Ok(select_recent(&mut conn, limit).await?)
    }

    async fn count_masked_ipv4(&self) -> StorageResult<i64> {
        let mut conn = self.pool.acquire().await?;
        Ok(select_masked_count(&mut conn).await?)
    }

    async fn log_visit(&self, visit: &NewVisit, limit: i64) -> StorageResult<VisitLog> {
        let mut conn = self.pool.acquire().await?;

        self.ensure_schema_on(&mut conn).await?;
        insert_visit(&mut conn, &visit.ip, &visit.user_agent, visit.at).await?;
        let visits = select_recent(&mut conn, limit).await?;
        let ipv4_count = select_masked_count(&mut conn).await?;

        Ok(VisitLog { visits, ipv4_count })
    }
}
