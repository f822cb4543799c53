//! Database initialization tests

use gridcast_common::db::init::{create_schema, init_database};
use sqlx::SqlitePool;

async fn table_names(pool: &SqlitePool) -> Vec<String> {
    sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name")
        .fetch_all(pool)
        .await
        .unwrap()
}

#[tokio::test]
async fn test_database_creation_when_missing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("nested").join("gridcast.db");

    let result = init_database(&db_path).await;

    assert!(result.is_ok(), "Database initialization failed: {:?}", result.err());
    assert!(db_path.exists(), "Database file was not created");
}

#[tokio::test]
async fn test_database_opens_existing() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("gridcast.db");

    let pool1 = init_database(&db_path).await.unwrap();
    sqlx::query(
        r#"
        INSERT INTO races (season, round, race_name, circuit_id, driver_id)
        VALUES (2023, 1, 'Bahrain Grand Prix', 'bahrain', 'max_verstappen')
        "#,
    )
    .execute(&pool1)
    .await
    .unwrap();
    pool1.close().await;

    let pool2 = init_database(&db_path).await.unwrap();
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM races")
        .fetch_one(&pool2)
        .await
        .unwrap();
    assert_eq!(count, 1, "Existing rows must survive re-initialization");
}

#[tokio::test]
async fn test_schema_creates_all_tables() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    create_schema(&pool).await.unwrap();

    let tables = table_names(&pool).await;
    for expected in [
        "aligned_features",
        "backfill_runs",
        "lap_times",
        "pit_stops",
        "qualifying",
        "races",
    ] {
        assert!(tables.iter().any(|t| t == expected), "missing table {}", expected);
    }
}

#[tokio::test]
async fn test_schema_is_idempotent() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    create_schema(&pool).await.unwrap();
    create_schema(&pool).await.unwrap();
}

#[tokio::test]
async fn test_qualifying_natural_key_is_unique() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    create_schema(&pool).await.unwrap();

    let insert = r#"
        INSERT INTO qualifying (season, round, driver_id, position, source)
        VALUES (2023, 5, 'leclerc', 1, 'results_api')
        "#;
    sqlx::query(insert).execute(&pool).await.unwrap();
    let second = sqlx::query(insert).execute(&pool).await;

    assert!(second.is_err(), "Second row for the same driver must be refused");
}

#[tokio::test]
async fn test_pit_stop_key_includes_stop_number() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    create_schema(&pool).await.unwrap();

    for stop in [1, 2] {
        sqlx::query(
            r#"
            INSERT INTO pit_stops (season, round, driver_id, stop_number, lap, source)
            VALUES (2023, 5, 'max_verstappen', ?, 20, 'results_api')
            "#,
        )
        .bind(stop)
        .execute(&pool)
        .await
        .unwrap();
    }

    let duplicate = sqlx::query(
        r#"
        INSERT INTO pit_stops (season, round, driver_id, stop_number, lap, source)
        VALUES (2023, 5, 'max_verstappen', 1, 40, 'telemetry_api')
        "#,
    )
    .execute(&pool)
    .await;
    assert!(duplicate.is_err());
}

#[tokio::test]
async fn test_lap_position_may_be_unknown_but_not_zero() {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    create_schema(&pool).await.unwrap();

    let insert = r#"
        INSERT INTO lap_times
            (season, round, driver_id, lap_number, position, time, time_millis, source)
        VALUES (2023, 16, ?, 2, ?, '1:32.000', 92000, 'telemetry_api')
        "#;
    let unknown = sqlx::query(insert)
        .bind("sainz")
        .bind(Option::<i32>::None)
        .execute(&pool)
        .await;
    assert!(unknown.is_ok());

    let zero = sqlx::query(insert).bind("norris").bind(0).execute(&pool).await;
    assert!(zero.is_err());
}
