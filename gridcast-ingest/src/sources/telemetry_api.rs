//! Telemetry API adapter (OpenF1-compatible)
//!
//! Covers pit stops and lap times from its first season onward. Never
//! provides qualifying.
//!
//! The API is keyed by `session_key` rather than `(season, round)`: the
//! round-th `Race` session of the year (by start date) is the race. Drivers
//! are identified by car number, resolved first against the stored roster
//! of that race, then against the configured number map.

use super::{assign_stop_numbers, finalize_laps, PendingLap, PendingPitStop};
use crate::db;
use crate::error::SourceError;
use crate::types::{
    DataCategory, MalformedRecord, NormalizedRecord, RaceKey, SourceAdapter, SourceBatch, SourceId,
};
use crate::utils::ResilientClient;
use async_trait::async_trait;
use chrono::DateTime;
use gridcast_common::time::{format_lap_time, seconds_to_millis};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tokio::sync::Mutex;

#[derive(Debug, Deserialize)]
struct SessionRow {
    session_key: i64,
    #[serde(default)]
    date_start: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PitRow {
    driver_number: Option<i32>,
    lap_number: Option<i32>,
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    pit_duration: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct LapRow {
    driver_number: Option<i32>,
    lap_number: Option<i32>,
    #[serde(default)]
    date_start: Option<String>,
    #[serde(default)]
    lap_duration: Option<f64>,
}

/// Lap end as epoch milliseconds, from its ISO 8601 start and duration
fn lap_completed_at(date_start: Option<&str>, time_millis: i64) -> Option<i64> {
    let start = DateTime::parse_from_rfc3339(date_start?).ok()?;
    Some(start.timestamp_millis() + time_millis)
}

/// Telemetry API adapter
pub struct TelemetryApiAdapter {
    client: ResilientClient,
    base_url: String,
    db: SqlitePool,
    driver_numbers: HashMap<i32, String>,
    first_season: i32,
    session_keys: Mutex<HashMap<RaceKey, Option<i64>>>,
}

impl TelemetryApiAdapter {
    pub fn new(
        client: ResilientClient,
        base_url: impl Into<String>,
        db: SqlitePool,
        driver_numbers: HashMap<i32, String>,
        first_season: i32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            db,
            driver_numbers,
            first_season,
            session_keys: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the race session key, cached per race
    async fn session_key(&self, race: RaceKey) -> Result<Option<i64>, SourceError> {
        if let Some(cached) = self.session_keys.lock().await.get(&race) {
            return Ok(*cached);
        }

        let url = format!("{}/sessions", self.base_url);
        let params = [
            ("year", race.season.to_string()),
            ("session_name", "Race".to_string()),
        ];
        let mut sessions: Vec<SessionRow> = self
            .client
            .get_json_optional(&url, &params)
            .await?
            .unwrap_or_default();

        sessions.sort_by(|a, b| a.date_start.cmp(&b.date_start));
        let key = usize::try_from(race.round - 1)
            .ok()
            .and_then(|index| sessions.get(index))
            .map(|s| s.session_key);

        tracing::debug!(
            season = race.season,
            round = race.round,
            session_key = ?key,
            "Resolved telemetry session"
        );
        self.session_keys.lock().await.insert(race, key);
        Ok(key)
    }

    /// Car number → driver id for this race
    async fn driver_lookup(&self, race: RaceKey) -> Result<HashMap<i32, String>, SourceError> {
        let mut lookup = self.driver_numbers.clone();
        lookup.extend(db::races::driver_ids_by_number(&self.db, race).await?);
        Ok(lookup)
    }

    async fn fetch_pit_stops(
        &self,
        race: RaceKey,
        session_key: i64,
    ) -> Result<SourceBatch, SourceError> {
        let url = format!("{}/pit", self.base_url);
        let rows: Vec<PitRow> = self
            .client
            .get_json_optional(&url, &[("session_key", session_key.to_string())])
            .await?
            .unwrap_or_default();
        if rows.is_empty() {
            return Ok(SourceBatch::empty());
        }

        let drivers = self.driver_lookup(race).await?;
        let mut pending = Vec::new();
        let mut malformed = Vec::new();

        for row in rows {
            let (Some(number), Some(lap)) = (row.driver_number, row.lap_number) else {
                malformed.push(MalformedRecord::new("pit row without driver_number or lap_number"));
                continue;
            };
            let Some(driver_id) = drivers.get(&number) else {
                malformed.push(MalformedRecord::new(format!("unknown car number {}", number)));
                continue;
            };
            pending.push(PendingPitStop {
                driver_id: driver_id.clone(),
                stop_number: None,
                lap,
                time: row.date,
                duration: row.pit_duration.map(|d| d.to_string()),
                duration_millis: row.pit_duration.and_then(seconds_to_millis),
            });
        }

        let records = assign_stop_numbers(race, pending)
            .into_iter()
            .map(NormalizedRecord::PitStop)
            .collect();
        Ok(SourceBatch::new(records, malformed))
    }

    async fn fetch_lap_times(
        &self,
        race: RaceKey,
        session_key: i64,
    ) -> Result<SourceBatch, SourceError> {
        let url = format!("{}/laps", self.base_url);
        let rows: Vec<LapRow> = self
            .client
            .get_json_optional(&url, &[("session_key", session_key.to_string())])
            .await?
            .unwrap_or_default();
        if rows.is_empty() {
            return Ok(SourceBatch::empty());
        }

        let drivers = self.driver_lookup(race).await?;
        let mut pending = Vec::new();
        let mut malformed = Vec::new();

        for row in rows {
            let (Some(number), Some(lap_number)) = (row.driver_number, row.lap_number) else {
                malformed.push(MalformedRecord::new("lap row without driver_number or lap_number"));
                continue;
            };
            let Some(driver_id) = drivers.get(&number) else {
                malformed.push(MalformedRecord::new(format!("unknown car number {}", number)));
                continue;
            };
            let Some(time_millis) = row.lap_duration.and_then(seconds_to_millis) else {
                malformed.push(MalformedRecord::new(format!(
                    "lap {} without duration for {}",
                    lap_number, driver_id
                )));
                continue;
            };
            pending.push(PendingLap {
                driver_id: driver_id.clone(),
                lap_number,
                position: None,
                time: format_lap_time(time_millis),
                time_millis,
                completed_at: lap_completed_at(row.date_start.as_deref(), time_millis),
            });
        }

        let records = finalize_laps(race, pending)
            .into_iter()
            .map(NormalizedRecord::LapTime)
            .collect();
        Ok(SourceBatch::new(records, malformed))
    }
}

#[async_trait]
impl SourceAdapter for TelemetryApiAdapter {
    fn id(&self) -> SourceId {
        SourceId::TelemetryApi
    }

    fn supports(&self, category: DataCategory) -> bool {
        matches!(category, DataCategory::PitStops | DataCategory::LapTimes)
    }

    async fn fetch(
        &self,
        category: DataCategory,
        race: RaceKey,
    ) -> Result<SourceBatch, SourceError> {
        if race.season < self.first_season || !self.supports(category) {
            return Ok(SourceBatch::empty());
        }

        let Some(session_key) = self.session_key(race).await? else {
            return Ok(SourceBatch::empty());
        };

        match category {
            DataCategory::PitStops => self.fetch_pit_stops(race, session_key).await,
            DataCategory::LapTimes => self.fetch_lap_times(race, session_key).await,
            DataCategory::Qualifying => Ok(SourceBatch::empty()),
        }
    }

    fn requests_made(&self) -> u64 {
        self.client.requests_made()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lap_end_is_start_plus_duration() {
        let start = "2023-09-17T12:04:35.200000+00:00";
        let ended = lap_completed_at(Some(start), 92_000);
        let expected = DateTime::parse_from_rfc3339(start)
            .map(|d| d.timestamp_millis() + 92_000)
            .ok();
        assert_eq!(ended, expected);
        assert!(ended.is_some());
    }

    #[test]
    fn test_lap_end_unknown_without_start() {
        assert_eq!(lap_completed_at(None, 92_000), None);
        assert_eq!(lap_completed_at(Some("not a date"), 92_000), None);
    }
}
