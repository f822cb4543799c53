//! Database test utilities

use anyhow::Result;
use gridcast_ingest::types::{RaceEntry, RaceKey};
use sqlx::SqlitePool;
use tempfile::TempDir;

/// Create a temporary canonical store with the schema applied
///
/// Returns (TempDir, SqlitePool) - TempDir must be kept alive for the test
pub async fn create_test_db() -> Result<(TempDir, SqlitePool)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test_gridcast.db");
    let pool = gridcast_ingest::db::init_database_pool(&db_path).await?;
    Ok((temp_dir, pool))
}

/// Driver id used by seeded rosters and fake sources: `driver_01`..
pub fn driver_id(index: usize) -> String {
    format!("driver_{:02}", index)
}

/// Seed a roster of `drivers` entries for `race`
///
/// Driver `i` starts from grid `i`, finishes `i`, carries car number
/// `i` and code `D{i:02}`.
pub async fn seed_race(pool: &SqlitePool, race: RaceKey, drivers: usize) -> Result<()> {
    let points = [25.0, 18.0, 15.0, 12.0, 10.0, 8.0, 6.0, 4.0, 2.0, 1.0];
    for i in 1..=drivers {
        let entry = RaceEntry {
            race,
            race_name: format!("Round {} Grand Prix", race.round),
            circuit_id: format!("circuit_{}", race.round),
            date: Some(format!("{}-05-07", race.season)),
            driver_id: driver_id(i),
            driver_code: Some(format!("D{:02}", i)),
            driver_number: Some(i as i32),
            constructor_id: Some(format!("team_{}", (i + 1) / 2)),
            grid: Some(i as i32),
            position: Some(i as i32),
            points: points.get(i - 1).copied().unwrap_or(0.0),
            status: Some("Finished".to_string()),
        };
        gridcast_ingest::db::races::insert(pool, &entry).await?;
    }
    Ok(())
}

pub async fn count_rows(pool: &SqlitePool, table: &str) -> i64 {
    sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table))
        .fetch_one(pool)
        .await
        .unwrap()
}
