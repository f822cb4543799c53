//! Lap time records

use gridcast_common::db::{LapTimeRecord, RaceKey, SourceId};
use gridcast_common::Result;
use sqlx::{Row, SqlitePool};

pub async fn count_for_race(pool: &SqlitePool, race: RaceKey) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM lap_times WHERE season = ? AND round = ?")
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
    lap_number: i32,
) -> Result<bool> {
    let row = sqlx::query(
        r#"
        SELECT 1 FROM lap_times
        WHERE season = ? AND round = ? AND driver_id = ? AND lap_number = ?
        LIMIT 1
        "#,
    )
    .bind(race.season)
    .bind(race.round)
    .bind(driver_id)
    .bind(lap_number)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn insert(pool: &SqlitePool, record: &LapTimeRecord, source: SourceId) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO lap_times
            (season, round, driver_id, lap_number, position, time, time_millis, source)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.race.season)
    .bind(record.race.round)
    .bind(&record.driver_id)
    .bind(record.lap_number)
    .bind(record.position)
    .bind(&record.time)
    .bind(record.time_millis)
    .bind(source.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn for_race(pool: &SqlitePool, race: RaceKey) -> Result<Vec<LapTimeRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT driver_id, lap_number, position, time, time_millis FROM lap_times
        WHERE season = ? AND round = ?
        ORDER BY driver_id, lap_number
        "#,
    )
    .bind(race.season)
    .bind(race.round)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| LapTimeRecord {
            race,
            driver_id: row.get("driver_id"),
            lap_number: row.get("lap_number"),
            position: row.get::<Option<i32>, _>("position"),
            time: row.get("time"),
            time_millis: row.get("time_millis"),
        })
        .collect())
}
