//! Race result rows (`races` table)
//!
//! Roster of each race plus the identity columns (car number, three-letter
//! code) that sources without canonical driver ids are joined against.

use gridcast_common::db::{RaceEntry, RaceKey};
use gridcast_common::Result;
use sqlx::{sqlite::SqliteRow, Row, SqlitePool};
use std::collections::HashMap;

fn entry_from_row(row: &SqliteRow) -> RaceEntry {
    RaceEntry {
        race: RaceKey::new(row.get("season"), row.get("round")),
        race_name: row.get("race_name"),
        circuit_id: row.get("circuit_id"),
        date: row.get("date"),
        driver_id: row.get("driver_id"),
        driver_code: row.get("driver_code"),
        driver_number: row.get("driver_number"),
        constructor_id: row.get("constructor_id"),
        grid: row.get("grid"),
        position: row.get("position"),
        points: row.get("points"),
        status: row.get("status"),
    }
}

pub async fn exists(pool: &SqlitePool, race: RaceKey, driver_id: &str) -> Result<bool> {
    let row = sqlx::query(
        "SELECT 1 FROM races WHERE season = ? AND round = ? AND driver_id = ? LIMIT 1",
    )
    .bind(race.season)
    .bind(race.round)
    .bind(driver_id)
    .fetch_optional(pool)
    .await?;
    Ok(row.is_some())
}

pub async fn insert(pool: &SqlitePool, entry: &RaceEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO races (
            season, round, race_name, circuit_id, date, driver_id, driver_code,
            driver_number, constructor_id, grid, position, points, status
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(entry.race.season)
    .bind(entry.race.round)
    .bind(&entry.race_name)
    .bind(&entry.circuit_id)
    .bind(&entry.date)
    .bind(&entry.driver_id)
    .bind(&entry.driver_code)
    .bind(entry.driver_number)
    .bind(&entry.constructor_id)
    .bind(entry.grid)
    .bind(entry.position)
    .bind(entry.points)
    .bind(&entry.status)
    .execute(pool)
    .await?;

    Ok(())
}

/// Distinct race keys within a season range, oldest first
pub async fn race_keys(
    pool: &SqlitePool,
    first_season: i32,
    last_season: i32,
) -> Result<Vec<RaceKey>> {
    let rows = sqlx::query(
        r#"
        SELECT season, round FROM races
        WHERE season BETWEEN ? AND ?
        GROUP BY season, round
        ORDER BY season, round
        "#,
    )
    .bind(first_season)
    .bind(last_season)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| RaceKey::new(row.get("season"), row.get("round")))
        .collect())
}

pub async fn count_for_season(pool: &SqlitePool, season: i32) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM races WHERE season = ?")
        .bind(season)
        .fetch_one(pool)
        .await?;
    Ok(count)
}

pub async fn entries_for_race(pool: &SqlitePool, race: RaceKey) -> Result<Vec<RaceEntry>> {
    let rows = sqlx::query(
        r#"
        SELECT season, round, race_name, circuit_id, date, driver_id, driver_code,
               driver_number, constructor_id, grid, position, points, status
        FROM races
        WHERE season = ? AND round = ?
        ORDER BY COALESCE(position, 999), driver_id
        "#,
    )
    .bind(race.season)
    .bind(race.round)
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(entry_from_row).collect())
}

/// Car number → driver id for one race
pub async fn driver_ids_by_number(
    pool: &SqlitePool,
    race: RaceKey,
) -> Result<HashMap<i32, String>> {
    let rows = sqlx::query(
        r#"
        SELECT driver_number, driver_id FROM races
        WHERE season = ? AND round = ? AND driver_number IS NOT NULL
        "#,
    )
    .bind(race.season)
    .bind(race.round)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| (row.get::<i32, _>("driver_number"), row.get::<String, _>("driver_id")))
        .collect())
}

/// Three-letter code → driver id for one race
pub async fn driver_ids_by_code(
    pool: &SqlitePool,
    race: RaceKey,
) -> Result<HashMap<String, String>> {
    let rows = sqlx::query(
        r#"
        SELECT driver_code, driver_id FROM races
        WHERE season = ? AND round = ? AND driver_code IS NOT NULL
        "#,
    )
    .bind(race.season)
    .bind(race.round)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let code: String = row.get("driver_code");
            (code.to_uppercase(), row.get::<String, _>("driver_id"))
        })
        .collect())
}

/// Races this driver started at this circuit before `race`
pub async fn circuit_experience(
    pool: &SqlitePool,
    race: RaceKey,
    driver_id: &str,
    circuit_id: &str,
) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM races
        WHERE driver_id = ? AND circuit_id = ?
          AND (season < ? OR (season = ? AND round < ?))
        "#,
    )
    .bind(driver_id)
    .bind(circuit_id)
    .bind(race.season)
    .bind(race.season)
    .bind(race.round)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

/// Points of the driver's most recent races before `race`, newest first
pub async fn recent_driver_points(
    pool: &SqlitePool,
    race: RaceKey,
    driver_id: &str,
    limit: i64,
) -> Result<Vec<f64>> {
    let points: Vec<f64> = sqlx::query_scalar(
        r#"
        SELECT points FROM races
        WHERE driver_id = ? AND (season < ? OR (season = ? AND round < ?))
        ORDER BY season DESC, round DESC
        LIMIT ?
        "#,
    )
    .bind(driver_id)
    .bind(race.season)
    .bind(race.season)
    .bind(race.round)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(points)
}

/// Per-race constructor points totals before `race`, newest first
pub async fn recent_constructor_points(
    pool: &SqlitePool,
    race: RaceKey,
    constructor_id: &str,
    limit: i64,
) -> Result<Vec<f64>> {
    let points: Vec<f64> = sqlx::query_scalar(
        r#"
        SELECT SUM(points) AS total FROM races
        WHERE constructor_id = ? AND (season < ? OR (season = ? AND round < ?))
        GROUP BY season, round
        ORDER BY season DESC, round DESC
        LIMIT ?
        "#,
    )
    .bind(constructor_id)
    .bind(race.season)
    .bind(race.season)
    .bind(race.round)
    .bind(limit)
    .fetch_all(pool)
    .await?;
    Ok(points)
}
