//! Database initialization
//!
//! Opens (or creates) the canonical store and applies the schema. Every
//! table carries a UNIQUE constraint on its natural key, so the store
//! itself refuses a second row for the same race/driver/stop/lap even if
//! two writers race past the existence check.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new database: {}", db_path.display());
    } else {
        info!("Opened existing database: {}", db_path.display());
    }

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    create_schema(&pool).await?;

    Ok(pool)
}

/// Create every canonical table (idempotent)
///
/// Exposed separately so in-memory pools used by tests get the same schema.
pub async fn create_schema(pool: &SqlitePool) -> Result<()> {
    create_races_table(pool).await?;
    create_qualifying_table(pool).await?;
    create_pit_stops_table(pool).await?;
    create_lap_times_table(pool).await?;
    create_aligned_features_table(pool).await?;
    create_backfill_runs_table(pool).await?;
    Ok(())
}

async fn create_races_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS races (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            season INTEGER NOT NULL,
            round INTEGER NOT NULL CHECK (round >= 1),
            race_name TEXT NOT NULL,
            circuit_id TEXT NOT NULL,
            date TEXT,
            driver_id TEXT NOT NULL,
            driver_code TEXT,
            driver_number INTEGER,
            constructor_id TEXT,
            grid INTEGER,
            position INTEGER,
            points REAL NOT NULL DEFAULT 0,
            status TEXT,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (season, round, driver_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_races_key ON races(season, round)")
        .execute(pool)
        .await?;

    Ok(())
}

async fn create_qualifying_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS qualifying (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            season INTEGER NOT NULL,
            round INTEGER NOT NULL,
            driver_id TEXT NOT NULL,
            position INTEGER NOT NULL CHECK (position >= 1),
            q1 TEXT,
            q2 TEXT,
            q3 TEXT,
            source TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (season, round, driver_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_pit_stops_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pit_stops (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            season INTEGER NOT NULL,
            round INTEGER NOT NULL,
            driver_id TEXT NOT NULL,
            stop_number INTEGER NOT NULL CHECK (stop_number >= 1),
            lap INTEGER NOT NULL,
            time TEXT,
            duration TEXT,
            duration_millis INTEGER,
            source TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (season, round, driver_id, stop_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_lap_times_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS lap_times (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            season INTEGER NOT NULL,
            round INTEGER NOT NULL,
            driver_id TEXT NOT NULL,
            lap_number INTEGER NOT NULL CHECK (lap_number >= 1),
            position INTEGER CHECK (position IS NULL OR position >= 1),
            time TEXT NOT NULL,
            time_millis INTEGER NOT NULL,
            source TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            UNIQUE (season, round, driver_id, lap_number)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_aligned_features_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS aligned_features (
            season INTEGER NOT NULL,
            round INTEGER NOT NULL,
            driver_id TEXT NOT NULL,
            constructor_id TEXT,
            circuit_id TEXT NOT NULL,
            grid INTEGER NOT NULL,
            qualifying_position INTEGER NOT NULL,
            pit_stop_count INTEGER NOT NULL,
            mean_pit_duration_millis REAL NOT NULL,
            pace_ratio REAL NOT NULL,
            pace_std_ratio REAL NOT NULL,
            grid_penalty INTEGER NOT NULL,
            circuit_experience INTEGER NOT NULL,
            driver_form REAL NOT NULL,
            constructor_form REAL NOT NULL,
            has_qualifying INTEGER NOT NULL,
            has_pit_stops INTEGER NOT NULL,
            has_lap_times INTEGER NOT NULL,
            finish_position INTEGER,
            points REAL NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (season, round, driver_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_backfill_runs_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS backfill_runs (
            run_id TEXT PRIMARY KEY,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            first_season INTEGER NOT NULL,
            last_season INTEGER NOT NULL,
            report TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
