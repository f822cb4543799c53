//! Backfill run history

use gridcast_common::Result;
use sqlx::{Row, SqlitePool};

/// One persisted run summary
#[derive(Debug, Clone)]
pub struct RunRecord {
    pub run_id: String,
    pub started_at: String,
    pub finished_at: String,
    pub first_season: i32,
    pub last_season: i32,
    /// Serialized `BackfillReport`
    pub report: serde_json::Value,
}

pub async fn save_run(pool: &SqlitePool, run: &RunRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO backfill_runs
            (run_id, started_at, finished_at, first_season, last_season, report)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&run.run_id)
    .bind(&run.started_at)
    .bind(&run.finished_at)
    .bind(run.first_season)
    .bind(run.last_season)
    .bind(run.report.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn latest_run(pool: &SqlitePool) -> Result<Option<RunRecord>> {
    let row = sqlx::query(
        r#"
        SELECT run_id, started_at, finished_at, first_season, last_season, report
        FROM backfill_runs
        ORDER BY finished_at DESC
        LIMIT 1
        "#,
    )
    .fetch_optional(pool)
    .await?;

    match row {
        Some(row) => {
            let report: String = row.get("report");
            Ok(Some(RunRecord {
                run_id: row.get("run_id"),
                started_at: row.get("started_at"),
                finished_at: row.get("finished_at"),
                first_season: row.get("first_season"),
                last_season: row.get("last_season"),
                report: serde_json::from_str(&report).map_err(|e| {
                    gridcast_common::Error::InvalidInput(format!("Stored run report: {}", e))
                })?,
            }))
        }
        None => Ok(None),
    }
}
