//! Qualifying records

use gridcast_common::db::{QualifyingRecord, RaceKey, SourceId};
use gridcast_common::Result;
use sqlx::{Row, SqlitePool};

pub async fn count_for_race(pool: &SqlitePool, race: RaceKey) -> Result<i64> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM qualifying WHERE season = ? AND round = ?")
            .bind(race.season)
            .bind(race.round)
            .fetch_one(pool)
            .await?;
    Ok(count)
}

pub async fn exists(pool: &SqlitePool, race: RaceKey, driver_id: &str) -> Result<bool> {
    let row = sqlx::query(
        "SELECT 1 FROM qualifying WHERE season = ? AND round = ? AND driver_id = ? LIMIT 1",
    )
    .bind(race.season)
    .bind(race.round)
    .bind(driver_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn insert(pool: &SqlitePool, record: &QualifyingRecord, source: SourceId) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO qualifying (season, round, driver_id, position, q1, q2, q3, source)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(record.race.season)
    .bind(record.race.round)
    .bind(&record.driver_id)
    .bind(record.position)
    .bind(&record.q1)
    .bind(&record.q2)
    .bind(&record.q3)
    .bind(source.as_str())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn for_race(pool: &SqlitePool, race: RaceKey) -> Result<Vec<QualifyingRecord>> {
    let rows = sqlx::query(
        r#"
        SELECT driver_id, position, q1, q2, q3 FROM qualifying
        WHERE season = ? AND round = ?
        ORDER BY position
        "#,
    )
    .bind(race.season)
    .bind(race.round)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| QualifyingRecord {
            race,
            driver_id: row.get("driver_id"),
            position: row.get("position"),
            q1: row.get("q1"),
            q2: row.get("q2"),
            q3: row.get("q3"),
        })
        .collect())
}
