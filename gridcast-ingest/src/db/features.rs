//! Aligned feature rows
//!
//! Derived data: a race's rows are replaced wholesale on every rebuild.

use gridcast_common::db::{AlignedFeatureRow, RaceKey};
use gridcast_common::Result;
use sqlx::{Row, SqlitePool};

/// Replace all rows of one race in a single transaction
pub async fn replace_race(
    pool: &SqlitePool,
    race: RaceKey,
    rows: &[AlignedFeatureRow],
) -> Result<()> {
    let mut tx = pool.begin().await?;

    sqlx::query("DELETE FROM aligned_features WHERE season = ? AND round = ?")
        .bind(race.season)
        .bind(race.round)
        .execute(&mut *tx)
        .await?;

    for row in rows {
        sqlx::query(
            r#"
            INSERT INTO aligned_features (
                season, round, driver_id, constructor_id, circuit_id, grid,
                qualifying_position, pit_stop_count, mean_pit_duration_millis,
                pace_ratio, pace_std_ratio, grid_penalty, circuit_experience,
                driver_form, constructor_form, has_qualifying, has_pit_stops,
                has_lap_times, finish_position, points
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(row.race.season)
        .bind(row.race.round)
        .bind(&row.driver_id)
        .bind(&row.constructor_id)
        .bind(&row.circuit_id)
        .bind(row.grid)
        .bind(row.qualifying_position)
        .bind(row.pit_stop_count)
        .bind(row.mean_pit_duration_millis)
        .bind(row.pace_ratio)
        .bind(row.pace_std_ratio)
        .bind(row.grid_penalty)
        .bind(row.circuit_experience)
        .bind(row.driver_form)
        .bind(row.constructor_form)
        .bind(row.has_qualifying)
        .bind(row.has_pit_stops)
        .bind(row.has_lap_times)
        .bind(row.finish_position)
        .bind(row.points)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

pub async fn for_race(pool: &SqlitePool, race: RaceKey) -> Result<Vec<AlignedFeatureRow>> {
    let rows = sqlx::query(
        r#"
        SELECT * FROM aligned_features
        WHERE season = ? AND round = ?
        ORDER BY qualifying_position, driver_id
        "#,
    )
    .bind(race.season)
    .bind(race.round)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| AlignedFeatureRow {
            race,
            driver_id: row.get("driver_id"),
            constructor_id: row.get("constructor_id"),
            circuit_id: row.get("circuit_id"),
            grid: row.get("grid"),
            qualifying_position: row.get("qualifying_position"),
            pit_stop_count: row.get("pit_stop_count"),
            mean_pit_duration_millis: row.get("mean_pit_duration_millis"),
            pace_ratio: row.get("pace_ratio"),
            pace_std_ratio: row.get("pace_std_ratio"),
            grid_penalty: row.get("grid_penalty"),
            circuit_experience: row.get("circuit_experience"),
            driver_form: row.get("driver_form"),
            constructor_form: row.get("constructor_form"),
            has_qualifying: row.get("has_qualifying"),
            has_pit_stops: row.get("has_pit_stops"),
            has_lap_times: row.get("has_lap_times"),
            finish_position: row.get("finish_position"),
            points: row.get("points"),
        })
        .collect())
}
