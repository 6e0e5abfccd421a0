//! Integration tests for the visit store
//!
//! Tests can be filtered by database backend using the DATABASE_BACKEND environment variable:
//! - `DATABASE_BACKEND=sqlite cargo test` - Run only SQLite tests
//! - `DATABASE_BACKEND=postgres cargo test` - Run only PostgreSQL tests
//! - By default, both backends are tested; PostgreSQL additionally needs DATABASE_URL

use chrono::{Duration, Utc};
use sqlx::postgres::PgConnectOptions;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use visitlog::masking::{is_masked_ipv4, mask_ip};
use visitlog::models::NewVisit;
use visitlog::storage::{PoolSettings, PostgresStorage, SqliteStorage, Storage, StorageError};

/// Get the database backend to test from environment variable
fn should_test_backend(backend: &str) -> bool {
    match std::env::var("DATABASE_BACKEND") {
        Ok(val) => val.to_lowercase() == backend.to_lowercase(),
        Err(_) => true, // Test all backends if not specified
    }
}

fn single_connection() -> PoolSettings {
    PoolSettings {
        min_connections: 1,
        max_connections: 1,
        acquire_timeout: StdDuration::from_secs(5),
    }
}

/// Helper to create SQLite test storage
async fn create_sqlite_storage() -> Arc<SqliteStorage> {
    let storage = SqliteStorage::connect("sqlite::memory:", &single_connection())
        .await
        .unwrap();
    storage.ensure_schema().await.unwrap();
    Arc::new(storage)
}

/// Helper to create PostgreSQL test storage
async fn create_postgres_storage() -> Option<Arc<PostgresStorage>> {
    let db_url = std::env::var("DATABASE_URL").ok()?;
    let options = PgConnectOptions::from_str(&db_url).ok()?;
    let storage = PostgresStorage::connect(options, &PoolSettings::default())
        .await
        .ok()?;
    storage.ensure_schema().await.ok()?;
    Some(Arc::new(storage))
}

#[tokio::test]
async fn test_record_then_read_back_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let storage = create_sqlite_storage().await;

    let recorded = storage
        .record_visit("203.0.xxx.xxx", "curl/8.5.0", Utc::now())
        .await
        .unwrap();

    let recent = storage.recent_visits(1).await.unwrap();
    assert_eq!(recent, vec![recorded.clone()]);
    assert_eq!(recorded.ip, "203.0.xxx.xxx");
    assert_eq!(recorded.user_agent, "curl/8.5.0");
}

#[tokio::test]
async fn test_ids_increase_in_insertion_order_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let storage = create_sqlite_storage().await;
    let mut last_id = 0;

    for i in 0..5 {
        let visit = storage
            .record_visit(&format!("10.0.0.{i}"), "test", Utc::now())
            .await
            .unwrap();
        assert!(visit.id > last_id, "id {} not above {}", visit.id, last_id);
        last_id = visit.id;
    }
}

#[tokio::test]
async fn test_recent_visits_limit_and_order_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let storage = create_sqlite_storage().await;
    let base = Utc::now() - Duration::hours(2);

    for i in 0..150 {
        storage
            .record_visit(&format!("10.{i}.xxx.xxx"), "test", base + Duration::seconds(i))
            .await
            .unwrap();
    }

    let recent = storage.recent_visits(100).await.unwrap();
    assert_eq!(recent.len(), 100);
    assert_eq!(recent[0].ip, "10.149.xxx.xxx");
    assert_eq!(recent[99].ip, "10.50.xxx.xxx");
    assert!(recent.windows(2).all(|w| w[0].timestamp > w[1].timestamp));

    assert_eq!(storage.recent_visits(1000).await.unwrap().len(), 150);
    assert!(storage.recent_visits(0).await.unwrap().is_empty());
    assert!(storage.recent_visits(-1).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_timestamp_ties_break_by_id_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let storage = create_sqlite_storage().await;
    let at = Utc::now();

    let first = storage.record_visit("1.1.xxx.xxx", "a", at).await.unwrap();
    let second = storage.record_visit("2.2.xxx.xxx", "b", at).await.unwrap();
    let third = storage.record_visit("3.3.xxx.xxx", "c", at).await.unwrap();

    let recent = storage.recent_visits(10).await.unwrap();
    let ids: Vec<i64> = recent.iter().map(|v| v.id).collect();
    assert_eq!(ids, vec![third.id, second.id, first.id]);
}

#[tokio::test]
async fn test_count_masked_ipv4_mixed_entries_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let storage = create_sqlite_storage().await;

    let raw = [
        "203.0.113.7",
        "198.51.100.23",
        "999.1.1.1",
        "2001:db8::1",
        "::1",
        "1.2.3.4.5",
        "not-an-ip",
        " 10.0.0.1",
        "",
    ];
    let direct = [
        "a.b.xxx.xxx",
        "1.2.xxx.xxx.xxx",
        "1.2.3.xxx",
        "12345.6.xxx.xxx",
    ];

    let mut stored = Vec::new();
    for ip in raw {
        stored.push(mask_ip(ip));
    }
    for ip in direct {
        stored.push(ip.to_string());
    }

    for ip in &stored {
        storage.record_visit(ip, "test", Utc::now()).await.unwrap();
    }

    let expected = stored.iter().filter(|ip| is_masked_ipv4(ip)).count() as i64;
    // 203.0, 198.51, 999.1, and the wide-but-numeric 12345.6
    assert_eq!(expected, 4);
    assert_eq!(storage.count_masked_ipv4().await.unwrap(), expected);
}

#[tokio::test]
async fn test_ensure_schema_is_idempotent_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let storage = create_sqlite_storage().await;
    storage.record_visit("1.2.xxx.xxx", "a", Utc::now()).await.unwrap();

    for _ in 0..3 {
        storage.ensure_schema().await.unwrap();
    }

    assert_eq!(storage.recent_visits(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_schema_is_not_recreated_after_external_drop_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let storage = create_sqlite_storage().await;

    sqlx::query("DROP TABLE visits")
        .execute(storage.pool())
        .await
        .unwrap();

    // DDL already ran once for this store, so this does not recreate the table
    storage.ensure_schema().await.unwrap();

    let err = storage
        .record_visit("1.2.xxx.xxx", "a", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Database(_)), "unexpected error: {err:?}");

    // A fresh store runs the DDL again on the same database
    let rebuilt = SqliteStorage::new(storage.pool().clone());
    rebuilt.ensure_schema().await.unwrap();
    rebuilt.record_visit("1.2.xxx.xxx", "a", Utc::now()).await.unwrap();
    assert_eq!(rebuilt.count_masked_ipv4().await.unwrap(), 1);
}

#[tokio::test]
async fn test_log_visit_creates_schema_on_first_use_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    // No ensure_schema up front
    let storage = SqliteStorage::connect("sqlite::memory:", &single_connection())
        .await
        .unwrap();

    let visit = NewVisit {
        ip: mask_ip("192.168.10.20"),
        user_agent: "Unknown".to_string(),
        at: Utc::now(),
    };
    let log = storage.log_visit(&visit, 100).await.unwrap();

    assert_eq!(log.visits.len(), 1);
    assert_eq!(log.visits[0].ip, "192.168.xxx.xxx");
    assert_eq!(log.visits[0].user_agent, "Unknown");
    assert_eq!(log.ipv4_count, 1);
}

#[tokio::test]
async fn test_oversized_ip_is_rejected_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let storage = create_sqlite_storage().await;

    storage
        .record_visit(&"a".repeat(50), "ok", Utc::now())
        .await
        .unwrap();

    let err = storage
        .record_visit(&"a".repeat(51), "too long", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Database(_)), "unexpected error: {err:?}");

    assert_eq!(storage.recent_visits(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_pool_exhaustion_is_reported_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let settings = PoolSettings {
        acquire_timeout: StdDuration::from_millis(100),
        ..single_connection()
    };
    let storage = SqliteStorage::connect("sqlite::memory:", &settings)
        .await
        .unwrap();
    storage.ensure_schema().await.unwrap();

    let held = storage.pool().acquire().await.unwrap();

    let err = storage.count_masked_ipv4().await.unwrap_err();
    assert!(matches!(err, StorageError::PoolExhausted), "unexpected error: {err:?}");

    drop(held);
    assert_eq!(storage.count_masked_ipv4().await.unwrap(), 0);
}

#[tokio::test]
async fn test_concurrent_visits_share_the_pool_sqlite() {
    if !should_test_backend("sqlite") {
        return;
    }

    let storage = create_sqlite_storage().await;
    let mut handles = vec![];

    for i in 0..20 {
        let storage_clone: Arc<dyn Storage> = storage.clone();
        let handle = tokio::spawn(async move {
            let visit = NewVisit {
                ip: mask_ip(&format!("172.16.0.{i}")),
                user_agent: format!("client-{i}"),
                at: Utc::now(),
            };
            storage_clone.log_visit(&visit, 100).await
        });
        handles.push(handle);
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let recent = storage.recent_visits(100).await.unwrap();
    assert_eq!(recent.len(), 20);

    let mut ids: Vec<i64> = recent.iter().map(|v| v.id).collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), 20, "ids must be unique");

    assert_eq!(storage.count_masked_ipv4().await.unwrap(), 20);
}

#[tokio::test]
async fn test_record_then_read_back_postgres() {
    if !should_test_backend("postgres") {
        return;
    }

    let Some(storage) = create_postgres_storage().await else {
        return;
    };

    let recorded = storage
        .record_visit("203.0.xxx.xxx", "curl/8.5.0", Utc::now() + Duration::days(1))
        .await
        .unwrap();

    let recent = storage.recent_visits(1).await.unwrap();
    assert_eq!(recent.len(), 1);
    assert_eq!(recent[0].id, recorded.id);
    assert_eq!(recent[0], recorded);
}

#[tokio::test]
async fn test_count_masked_ipv4_postgres() {
    if !should_test_backend("postgres") {
        return;
    }

    let Some(storage) = create_postgres_storage().await else {
        return;
    };

    // Shared database: compare against the count before inserting
    let before = storage.count_masked_ipv4().await.unwrap();

    for ip in ["198.51.xxx.xxx", "2001:db8::1", "1.2.3.4.5", "a.b.xxx.xxx"] {
        storage.record_visit(ip, "test", Utc::now()).await.unwrap();
    }

    let after = storage.count_masked_ipv4().await.unwrap();
    assert_eq!(after - before, 1);

    let err = storage
        .record_visit(&"a".repeat(51), "too long", Utc::now())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::Database(_)));
}
