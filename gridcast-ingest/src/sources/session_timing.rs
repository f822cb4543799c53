//! Session-timing API adapter
//!
//! Loads whole sessions: `GET {base}/{season}/{round}/{Q|R}` returns the
//! classification (`results`) and every lap (`laps`) of one session, with
//! all times as raw milliseconds. Drivers are identified by three-letter
//! abbreviation, joined against the stored roster of the race.
//!
//! A session is loaded at most once per adapter; qualifying reads the `Q`
//! session, pit stops and lap times share the `R` session.

use super::{assign_stop_numbers, finalize_laps, PendingLap, PendingPitStop};
use crate::db;
use crate::error::SourceError;
use crate::types::{
    DataCategory, MalformedRecord, NormalizedRecord, QualifyingRecord, RaceKey, SourceAdapter,
    SourceBatch, SourceId,
};
use crate::utils::ResilientClient;
use async_trait::async_trait;
use gridcast_common::time::{format_lap_time, parse_duration_millis, DurationUnit};
use serde::Deserialize;
use sqlx::SqlitePool;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SessionKind {
    Qualifying,
    Race,
}

impl SessionKind {
    fn code(&self) -> &'static str {
        match self {
            SessionKind::Qualifying => "Q",
            SessionKind::Race => "R",
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SessionPayload {
    #[serde(default)]
    results: Vec<ResultRow>,
    #[serde(default)]
    laps: Vec<LapRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ResultRow {
    abbreviation: Option<String>,
    position: Option<f64>,
    #[serde(rename = "Q1")]
    q1: Option<f64>,
    #[serde(rename = "Q2")]
    q2: Option<f64>,
    #[serde(rename = "Q3")]
    q3: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct LapRow {
    driver: Option<String>,
    lap_number: Option<f64>,
    lap_time: Option<f64>,
    /// Session time at the end of the lap
    time: Option<f64>,
    position: Option<f64>,
    pit_in_time: Option<f64>,
    pit_out_time: Option<f64>,
}

/// Whole-number float fields (FastF1 style) to `i32`
fn whole(value: Option<f64>) -> Option<i32> {
    value
        .filter(|v| v.is_finite() && *v >= 1.0)
        .map(|v| v.round() as i32)
}

fn session_time(value: Option<f64>) -> Option<String> {
    value
        .filter(|v| v.is_finite() && *v > 0.0)
        .map(|v| format_lap_time(v.round() as i64))
}

type SessionCache = HashMap<(RaceKey, SessionKind), Option<Arc<SessionPayload>>>;

/// Session-timing API adapter
pub struct SessionTimingAdapter {
    client: ResilientClient,
    base_url: String,
    db: SqlitePool,
    first_season: i32,
    sessions: Mutex<SessionCache>,
}

impl SessionTimingAdapter {
    pub fn new(
        client: ResilientClient,
        base_url: impl Into<String>,
        db: SqlitePool,
        first_season: i32,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            db,
            first_season,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    async fn load_session(
        &self,
        race: RaceKey,
        kind: SessionKind,
    ) -> Result<Option<Arc<SessionPayload>>, SourceError> {
        if let Some(cached) = self.sessions.lock().await.get(&(race, kind)) {
            return Ok(cached.clone());
        }

        let url = format!("{}/{}/{}/{}", self.base_url, race.season, race.round, kind.code());
        let payload: Option<SessionPayload> = self.client.get_json_optional(&url, &[]).await?;
        let payload = payload.map(Arc::new);

        tracing::debug!(
            season = race.season,
            round = race.round,
            session = kind.code(),
            found = payload.is_some(),
            "Loaded timing session"
        );
        self.sessions.lock().await.insert((race, kind), payload.clone());
        Ok(payload)
    }

    fn resolve<'a>(
        codes: &'a HashMap<String, String>,
        abbreviation: Option<&str>,
    ) -> Result<&'a String, MalformedRecord> {
        let code = abbreviation
            .map(|a| a.trim().to_uppercase())
            .filter(|a| !a.is_empty())
            .ok_or_else(|| MalformedRecord::new("row without driver abbreviation"))?;
        codes
            .get(&code)
            .ok_or_else(|| {
                MalformedRecord::new(format!("abbreviation {} not in race roster", code))
            })
    }

    fn map_qualifying(
        race: RaceKey,
        session: &SessionPayload,
        codes: &HashMap<String, String>,
    ) -> SourceBatch {
        let mut records = Vec::new();
        let mut malformed = Vec::new();

        for row in &session.results {
            let driver_id = match Self::resolve(codes, row.abbreviation.as_deref()) {
                Ok(id) => id,
                Err(m) => {
                    malformed.push(m);
                    continue;
                }
            };
            let Some(position) = whole(row.position) else {
                malformed.push(MalformedRecord::new(format!(
                    "no qualifying position for {}",
                    driver_id
                )));
                continue;
            };
            records.push(NormalizedRecord::Qualifying(QualifyingRecord {
                race,
                driver_id: driver_id.clone(),
                position,
                q1: session_time(row.q1),
                q2: session_time(row.q2),
                q3: session_time(row.q3),
            }));
        }

        SourceBatch::new(records, malformed)
    }

    /// Pair each in-lap's pit entry with the following lap's pit exit
    fn map_pit_stops(
        race: RaceKey,
        session: &SessionPayload,
        codes: &HashMap<String, String>,
    ) -> SourceBatch {
        let mut malformed = Vec::new();
        let mut by_driver: HashMap<String, BTreeMap<i32, &LapRow>> = HashMap::new();

        for row in &session.laps {
            if row.pit_in_time.is_none() && row.pit_out_time.is_none() {
                continue;
            }
            let driver_id = match Self::resolve(codes, row.driver.as_deref()) {
                Ok(id) => id,
                Err(m) => {
                    malformed.push(m);
                    continue;
                }
            };
            let Some(lap_number) = whole(row.lap_number) else {
                malformed.push(MalformedRecord::new(format!(
                    "pit lap without number for {}",
                    driver_id
                )));
                continue;
            };
            by_driver.entry(driver_id.clone()).or_default().insert(lap_number, row);
        }

        let mut pending = Vec::new();
        for (driver_id, laps) in by_driver {
            for (&lap_number, row) in &laps {
                let Some(pit_in) = row.pit_in_time else {
                    continue;
                };
                let duration_ms = laps
                    .get(&(lap_number + 1))
                    .and_then(|next| next.pit_out_time)
                    .map(|pit_out| (pit_out - pit_in).round() as i64)
                    .filter(|ms| *ms > 0);
                let duration = duration_ms.map(|ms| ms.to_string());

                // Pit-in is a session offset, not a time of day
                pending.push(PendingPitStop {
                    driver_id: driver_id.clone(),
                    stop_number: None,
                    lap: lap_number,
                    time: None,
                    duration_millis: duration
                        .as_deref()
                        .and_then(|d| parse_duration_millis(d, DurationUnit::Millis)),
                    duration,
                });
            }
        }

        let records = assign_stop_numbers(race, pending)
            .into_iter()
            .map(NormalizedRecord::PitStop)
            .collect();
        SourceBatch::new(records, malformed)
    }

    fn map_lap_times(
        race: RaceKey,
        session: &SessionPayload,
        codes: &HashMap<String, String>,
    ) -> SourceBatch {
        let mut pending = Vec::new();
        let mut malformed = Vec::new();

        for row in &session.laps {
            let driver_id = match Self::resolve(codes, row.driver.as_deref()) {
                Ok(id) => id,
                Err(m) => {
                    malformed.push(m);
                    continue;
                }
            };
            let Some(lap_number) = whole(row.lap_number) else {
                malformed.push(MalformedRecord::new(format!(
                    "lap without number for {}",
                    driver_id
                )));
                continue;
            };
            let Some(time_millis) = row
                .lap_time
                .filter(|t| t.is_finite() && *t > 0.0)
                .map(|t| t.round() as i64)
            else {
                malformed.push(MalformedRecord::new(format!(
                    "lap {} without time for {}",
                    lap_number, driver_id
                )));
                continue;
            };
            pending.push(PendingLap {
                driver_id: driver_id.clone(),
                lap_number,
                position: whole(row.position),
                time: format_lap_time(time_millis),
                time_millis,
                completed_at: row.time.filter(|t| t.is_finite()).map(|t| t.round() as i64),
            });
        }

        let records = finalize_laps(race, pending)
            .into_iter()
            .map(NormalizedRecord::LapTime)
            .collect();
        SourceBatch::new(records, malformed)
    }
}

#[async_trait]
impl SourceAdapter for SessionTimingAdapter {
    fn id(&self) -> SourceId {
        SourceId::SessionTiming
    }

    fn supports(&self, _category: DataCategory) -> bool {
        true
    }

    async fn fetch(
        &self,
        category: DataCategory,
        race: RaceKey,
    ) -> Result<SourceBatch, SourceError> {
        if race.season < self.first_season {
            return Ok(SourceBatch::empty());
        }

        let kind = match category {
            DataCategory::Qualifying => SessionKind::Qualifying,
            DataCategory::PitStops | DataCategory::LapTimes => SessionKind::Race,
        };
        let Some(session) = self.load_session(race, kind).await? else {
            return Ok(SourceBatch::empty());
        };

        let codes = db::races::driver_ids_by_code(&self.db, race).await?;
        if codes.is_empty() {
            tracing::warn!(
                season = race.season,
                round = race.round,
                "No stored roster to resolve session-timing abbreviations"
            );
        }

        Ok(match category {
            DataCategory::Qualifying => Self::map_qualifying(race, &session, &codes),
            DataCategory::PitStops => Self::map_pit_stops(race, &session, &codes),
            DataCategory::LapTimes => Self::map_lap_times(race, &session, &codes),
        })
    }

    fn requests_made(&self) -> u64 {
        self.client.requests_made()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codes() -> HashMap<String, String> {
        HashMap::from([
            ("VER".to_string(), "max_verstappen".to_string()),
            ("LEC".to_string(), "leclerc".to_string()),
        ])
    }

    fn lap(
        driver: &str,
        number: f64,
        time: Option<f64>,
        pit_in: Option<f64>,
        pit_out: Option<f64>,
    ) -> LapRow {
        LapRow {
            driver: Some(driver.to_string()),
            lap_number: Some(number),
            lap_time: time,
            time: None,
            position: None,
            pit_in_time: pit_in,
            pit_out_time: pit_out,
        }
    }

    #[test]
    fn test_pit_duration_pairs_in_lap_with_next_out_lap() {
        let session = SessionPayload {
            results: vec![],
            laps: vec![
                lap("VER", 17.0, Some(99_000.0), Some(1_800_000.0), None),
                lap("VER", 18.0, Some(110_000.0), None, Some(1_802_345.0)),
                lap("LEC", 30.0, Some(99_000.0), Some(3_000_000.0), None),
            ],
        };

        let batch = SessionTimingAdapter::map_pit_stops(RaceKey::new(2023, 5), &session, &codes());
        let stops: Vec<_> = batch
            .records
            .iter()
            .map(|r| match r {
                NormalizedRecord::PitStop(p) => p.clone(),
                other => panic!("unexpected record {:?}", other),
            })
            .collect();

        let ver = stops.iter().find(|p| p.driver_id == "max_verstappen").unwrap();
        assert_eq!(ver.lap, 17);
        assert_eq!(ver.stop_number, 1);
        assert_eq!(ver.duration.as_deref(), Some("2345"));
        assert_eq!(ver.duration_millis, Some(2345));
        assert_eq!(ver.time, None, "session offsets are not stored as time of day");

        // No out-lap recorded: stop kept, duration unknown
        let lec = stops.iter().find(|p| p.driver_id == "leclerc").unwrap();
        assert_eq!(lec.duration_millis, None);
    }

    #[test]
    fn test_unknown_abbreviation_is_malformed() {
        let session = SessionPayload {
            results: vec![ResultRow {
                abbreviation: Some("XXX".to_string()),
                position: Some(1.0),
                q1: Some(90_000.0),
                q2: None,
                q3: None,
            }],
            laps: vec![],
        };

        let batch = SessionTimingAdapter::map_qualifying(RaceKey::new(2023, 5), &session, &codes());
        assert!(batch.is_empty());
        assert_eq!(batch.malformed.len(), 1);
    }

    #[test]
    fn test_qualifying_times_formatted_as_lap_text() {
        let session = SessionPayload {
            results: vec![ResultRow {
                abbreviation: Some("ver".to_string()),
                position: Some(1.0),
                q1: Some(89_708.0),
                q2: Some(88_877.0),
                q3: None,
            }],
            laps: vec![],
        };

        let batch = SessionTimingAdapter::map_qualifying(RaceKey::new(2023, 5), &session, &codes());
        match &batch.records[0] {
            NormalizedRecord::Qualifying(q) => {
                assert_eq!(q.driver_id, "max_verstappen");
                assert_eq!(q.q1.as_deref(), Some("1:29.708"));
                assert_eq!(q.q2.as_deref(), Some("1:28.877"));
                assert_eq!(q.q3, None);
            }
            other => panic!("unexpected record {:?}", other),
        }
    }

    #[test]
    fn test_positions_follow_session_time_past_unrecorded_lap() {
        let ended_at = |row: LapRow, at: f64| LapRow { time: Some(at), ..row };
        let session = SessionPayload {
            results: vec![],
            laps: vec![
                lap("VER", 1.0, None, None, None),
                lap("LEC", 1.0, None, None, None),
                ended_at(lap("VER", 2.0, Some(92_000.0), None, None), 3_792_000.0),
                ended_at(lap("LEC", 2.0, Some(91_000.0), None, None), 3_796_000.0),
            ],
        };

        let batch = SessionTimingAdapter::map_lap_times(RaceKey::new(2023, 16), &session, &codes());
        assert_eq!(batch.malformed.len(), 2);
        let positions: Vec<(String, Option<i32>)> = batch
            .records
            .iter()
            .map(|r| match r {
                NormalizedRecord::LapTime(l) => (l.driver_id.clone(), l.position),
                other => panic!("unexpected record {:?}", other),
            })
            .collect();
        assert_eq!(
            positions,
            vec![
                ("max_verstappen".to_string(), Some(1)),
                ("leclerc".to_string(), Some(2))
            ]
        );
    }

    #[test]
    fn test_lap_without_time_is_malformed() {
        let session = SessionPayload {
            results: vec![],
            laps: vec![
                lap("VER", 1.0, None, None, None),
                lap("VER", 2.0, Some(95_123.0), None, None),
            ],
        };

        let batch = SessionTimingAdapter::map_lap_times(RaceKey::new(2023, 5), &session, &codes());
        assert_eq!(batch.len(), 1);
        assert_eq!(batch.malformed.len(), 1);
    }
}
