use crate::masking::MASKED_IPV4_PATTERN;
use crate::models::{NewVisit, Visit, VisitLog, VisitRow};
use crate::storage::{PoolSettings, Storage, StorageResult};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{PgConnection, PgPool};
use tokio::sync::OnceCell;

pub struct PostgresStorage {
    pool: PgPool,
    schema_ready: OnceCell<()>,
}

impl PostgresStorage {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            schema_ready: OnceCell::new(),
        }
    }

    pub async fn connect(options: PgConnectOptions, settings: &PoolSettings) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .min_connections(settings.min_connections)
            .max_connections(settings.max_connections)
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await?;

        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn ensure_schema_on(&self, conn: &mut PgConnection) -> StorageResult<()> {
        self.schema_ready
            .get_or_try_init(|| create_schema(conn))
            .await?;
        Ok(())
    }
}

async fn create_schema(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS visits (
            id BIGSERIAL PRIMARY KEY,
            ip VARCHAR(50) NOT NULL,
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

    tracing::debug!("visits table ready (postgres)");
    Ok(())
}

async fn insert_visit(
    conn: &mut PgConnection,
    ip: &str,
    user_agent: &str,
    at: DateTime<Utc>,
) -> Result<Visit, sqlx::Error> {
    let row = sqlx::query_as::<_, VisitRow>(
        r#"
        INSERT INTO visits (ip, user_agent, ts)
        VALUES ($1, $2, $3)
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

async fn select_recent(conn: &mut PgConnection, limit: i64) -> Result<Vec<Visit>, sqlx::Error> {
    // Postgres rejects a negative LIMIT
    if limit <= 0 {
        return Ok(Vec::new());
    }

    let rows = sqlx::query_as::<_, VisitRow>(
        r#"
        SELECT id, ip, user_agent, ts
        FROM visits
        ORDER BY ts DESC, id DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(&mut *conn)
    .await?;

    Ok(rows.into_iter().map(Visit::from).collect())
}

async fn select_masked_count(conn: &mut PgConnection) -> Result<i64, sqlx::Error> {
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM visits WHERE ip ~ $1")
        .bind(MASKED_IPV4_PATTERN)
        .fetch_one(&mut *conn)
        .await?;

    Ok(count.0)
}

#[async_trait]
impl Storage for PostgresStorage {
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
