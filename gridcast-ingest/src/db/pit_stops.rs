//! Pit stop records

use gridcast_common::db::{PitStopRecord, RaceKey, SourceId};
use gridcast_common::Result;
use sqlx::{Row, SqlitePool};

pub async fn count_for_race(pool: &SqlitePool, race: RaceKey) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM pit_stops WHERE season = ? AND round = ?")
            .bind(race.season)
            .bind(race.round)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

pub async fn exists(
    pool: &SqlitePool,
    race: RaceKey,
    driver_id: &str,
    stop_number: i32,
) -> Result<bool> {
    let row = sqlx::query(
        r#"
        SELECT 1 FROM pit_stops
        WHERE season = ? AND round = ? AND driver_id = ? AND stop_number = ?
        LIMIT 1
        "#,
    )
    .bind(race.season)
    .bind(race.round)
    .bind(driver_id)
    .bind(stop_number)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn insert(pool: &SqlitePool, record: &PitStopRecord, source: SourceId) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO pit_stops (
            season, round, driver_id, stop_number, lap, time, duration, duration_millis, source
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.race.season)
    .bind(record.race.round)
    .bind(&record.driver_id)
    .bind(record.stop_number)
    .bind(record.lap)
    .bind(&record.time)
    .bind(&record.duration)
    .bind(record.duration_millis)
    .bind(source.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn for_race(pool: &SqlitePool, race: RaceKey) -> Result<Vec<PitStopRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT driver_id, stop_number, lap, time, duration, duration_millis FROM pit_stops
        WHERE season = ? AND round = ?
        ORDER BY driver_id, stop_number
        "#,
    )
    .bind(race.season)
    .bind(race.round)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| PitStopRecord {
            race,
            driver_id: row.get("driver_id"),
            stop_number: row.get("stop_number"),
            lap: row.get("lap"),
            time: row.get("time"),
            duration: row.get("duration"),
            duration_millis: row.get("duration_millis"),
        })
        .collect())
}
