//! Results API adapter (Ergast-compatible)
//!
//! **Endpoints:**
//! - `{base}/{season}/{round}/qualifying.json`
//! - `{base}/{season}/{round}/pitstops.json`
//! - `{base}/{season}/{round}/laps.json`
//! - `{base}/{season}/{round}/results.json` (roster bootstrap)
//! - `{base}/{season}.json` (season schedule)
//!
//! Every numeric field arrives as a string. Driver ids are already
//! canonical. Responses are paged via `MRData.limit/offset/total`.

use super::{assign_stop_numbers, finalize_laps, PendingLap, PendingPitStop};
use crate::error::SourceError;
use crate::types::{
    DataCategory, MalformedRecord, NormalizedRecord, QualifyingRecord, RaceEntry, RaceKey,
    SourceAdapter, SourceBatch, SourceId,
};
use crate::utils::ResilientClient;
use async_trait::async_trait;
use gridcast_common::time::{parse_duration_millis, parse_lap_time_millis, DurationUnit};
use serde::Deserialize;

/// Rows requested per page
const PAGE_LIMIT: u32 = 100;
/// Safety stop on paging loops
const MAX_PAGES: u32 = 40;

#[derive(Debug, Deserialize)]
struct ErgastResponse {
    #[serde(rename = "MRData")]
    mr_data: MrData,
}

#[derive(Debug, Deserialize)]
struct MrData {
    #[serde(default)]
    limit: Option<String>,
    #[serde(default)]
    offset: Option<String>,
    #[serde(default)]
    total: Option<String>,
    #[serde(rename = "RaceTable")]
    race_table: Option<RaceTable>,
}

#[derive(Debug, Deserialize)]
struct RaceTable {
    #[serde(rename = "Races", default)]
    races: Vec<ErgastRace>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErgastRace {
    season: String,
    round: String,
    race_name: String,
    #[serde(rename = "Circuit")]
    circuit: Option<ErgastCircuit>,
    #[serde(default)]
    date: Option<String>,
    #[serde(rename = "QualifyingResults", default)]
    qualifying_results: Vec<QualifyingRow>,
    #[serde(rename = "PitStops", default)]
    pit_stops: Vec<PitStopRow>,
    #[serde(rename = "Laps", default)]
    laps: Vec<LapRow>,
    #[serde(rename = "Results", default)]
    results: Vec<ResultRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErgastCircuit {
    circuit_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErgastDriver {
    driver_id: String,
    #[serde(default)]
    permanent_number: Option<String>,
    #[serde(default)]
    code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErgastConstructor {
    constructor_id: String,
}

#[derive(Debug, Deserialize)]
struct QualifyingRow {
    #[serde(default)]
    position: Option<String>,
    #[serde(rename = "Driver")]
    driver: Option<ErgastDriver>,
    #[serde(rename = "Q1", default)]
    q1: Option<String>,
    #[serde(rename = "Q2", default)]
    q2: Option<String>,
    #[serde(rename = "Q3", default)]
    q3: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PitStopRow {
    #[serde(default)]
    driver_id: Option<String>,
    #[serde(default)]
    stop: Option<String>,
    #[serde(default)]
    lap: Option<String>,
    #[serde(default)]
    time: Option<String>,
    #[serde(default)]
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LapRow {
    number: String,
    #[serde(rename = "Timings", default)]
    timings: Vec<TimingRow>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TimingRow {
    #[serde(default)]
    driver_id: Option<String>,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    time: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResultRow {
    #[serde(default)]
    number: Option<String>,
    #[serde(default)]
    position: Option<String>,
    #[serde(default)]
    points: Option<String>,
    #[serde(rename = "Driver")]
    driver: ErgastDriver,
    #[serde(rename = "Constructor")]
    constructor: Option<ErgastConstructor>,
    #[serde(default)]
    grid: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

/// One race from a season schedule
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledRace {
    pub race: RaceKey,
    pub race_name: String,
    pub circuit_id: String,
    pub date: Option<String>,
}

fn parse_int(value: Option<&str>) -> Option<i32> {
    value.and_then(|v| v.trim().parse().ok())
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Results API adapter
pub struct ResultsApiAdapter {
    client: ResilientClient,
    base_url: String,
}

impl ResultsApiAdapter {
    pub fn new(client: ResilientClient, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    /// Fetch every page of a race-scoped resource
    ///
    /// Races from all pages are returned; one race's rows may be split
    /// across several pages.
    async fn fetch_pages(&self, path: &str) -> Result<Vec<ErgastRace>, SourceError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut races = Vec::new();
        let mut offset: u32 = 0;

        for _ in 0..MAX_PAGES {
            let params = [("limit", PAGE_LIMIT.to_string()), ("offset", offset.to_string())];
            let response: Option<ErgastResponse> =
                self.client.get_json_optional(&url, &params).await?;
            let Some(response) = response else {
                break;
            };

            let data = response.mr_data;
            let total: u32 = data.total.as_deref().and_then(|t| t.parse().ok()).unwrap_or(0);
            let limit: u32 = data
                .limit
                .as_deref()
                .and_then(|l| l.parse().ok())
                .unwrap_or(PAGE_LIMIT)
                .max(1);
            let page_offset: u32 = data
                .offset
                .as_deref()
                .and_then(|o| o.parse().ok())
                .unwrap_or(offset);

            if let Some(table) = data.race_table {
                races.extend(table.races);
            }

            offset = page_offset + limit;
            if offset >= total {
                break;
            }
        }

        Ok(races)
    }

    fn race_path(race: RaceKey, resource: &str) -> String {
        format!("{}/{}/{}.json", race.season, race.round, resource)
    }

    async fn fetch_qualifying(&self, race: RaceKey) -> Result<SourceBatch, SourceError> {
        let races = self.fetch_pages(&Self::race_path(race, "qualifying")).await?;
        let mut records = Vec::new();
        let mut malformed = Vec::new();

        for row in races.into_iter().flat_map(|r| r.qualifying_results) {
            let Some(driver) = row.driver else {
                malformed.push(MalformedRecord::new("qualifying row without Driver"));
                continue;
            };
            match parse_int(row.position.as_deref()).filter(|p| *p >= 1) {
                Some(position) => records.push(NormalizedRecord::Qualifying(QualifyingRecord {
                    race,
                    driver_id: driver.driver_id,
                    position,
                    q1: non_empty(row.q1),
                    q2: non_empty(row.q2),
                    q3: non_empty(row.q3),
                })),
                None => malformed.push(MalformedRecord::new(format!(
                    "qualifying position {:?} for {}",
                    row.position, driver.driver_id
                ))),
            }
        }

        Ok(SourceBatch::new(records, malformed))
    }

    async fn fetch_pit_stops(&self, race: RaceKey) -> Result<SourceBatch, SourceError> {
        let races = self.fetch_pages(&Self::race_path(race, "pitstops")).await?;
        let mut pending = Vec::new();
        let mut malformed = Vec::new();

        for row in races.into_iter().flat_map(|r| r.pit_stops) {
            let (Some(driver_id), Some(lap)) = (row.driver_id, parse_int(row.lap.as_deref())) else {
                malformed.push(MalformedRecord::new("pit stop without driver or lap"));
                continue;
            };
            let duration = non_empty(row.duration);
            pending.push(PendingPitStop {
                driver_id,
                stop_number: parse_int(row.stop.as_deref()).filter(|s| *s >= 1),
                lap,
                time: non_empty(row.time),
                duration_millis: duration
                    .as_deref()
                    .and_then(|d| parse_duration_millis(d, DurationUnit::Seconds)),
                duration,
            });
        }

        let records = assign_stop_numbers(race, pending)
            .into_iter()
            .map(NormalizedRecord::PitStop)
            .collect();
        Ok(SourceBatch::new(records, malformed))
    }

    async fn fetch_lap_times(&self, race: RaceKey) -> Result<SourceBatch, SourceError> {
        let races = self.fetch_pages(&Self::race_path(race, "laps")).await?;
        let mut pending = Vec::new();
        let mut malformed = Vec::new();

        for lap in races.into_iter().flat_map(|r| r.laps) {
            let Some(lap_number) = parse_int(Some(lap.number.as_str())).filter(|n| *n >= 1) else {
                malformed.push(MalformedRecord::new(format!("lap number {:?}", lap.number)));
                continue;
            };
            for timing in lap.timings {
                let Some(driver_id) = timing.driver_id else {
                    malformed.push(MalformedRecord::new(format!(
                        "lap {} timing without driver",
                        lap_number
                    )));
                    continue;
                };
                let time = timing.time.unwrap_or_default();
                let Some(time_millis) = parse_lap_time_millis(&time) else {
                    malformed.push(MalformedRecord::new(format!(
                        "lap {} time {:?} for {}",
                        lap_number, time, driver_id
                    )));
                    continue;
                };
                pending.push(PendingLap {
                    driver_id,
                    lap_number,
                    position: parse_int(timing.position.as_deref()).filter(|p| *p >= 1),
                    time,
                    time_millis,
                    completed_at: None,
                });
            }
        }

        let records = finalize_laps(race, pending)
            .into_iter()
            .map(NormalizedRecord::LapTime)
            .collect();
        Ok(SourceBatch::new(records, malformed))
    }

    /// Races of one season, in round order
    pub async fn season_schedule(&self, season: i32) -> Result<Vec<ScheduledRace>, SourceError> {
        let races = self.fetch_pages(&format!("{}.json", season)).await?;
        let mut schedule: Vec<ScheduledRace> = races
            .into_iter()
            .filter_map(|r| {
                let race = RaceKey::new(r.season.parse().ok()?, r.round.parse().ok()?);
                Some(ScheduledRace {
                    race,
                    race_name: r.race_name,
                    circuit_id: r.circuit.map(|c| c.circuit_id).unwrap_or_default(),
                    date: r.date,
                })
            })
            .collect();
        schedule.sort_by_key(|r| r.race);
        schedule.dedup_by_key(|r| r.race);
        Ok(schedule)
    }

    /// Classified results of one race as roster rows
    pub async fn race_results(&self, race: RaceKey) -> Result<Vec<RaceEntry>, SourceError> {
        let races = self.fetch_pages(&Self::race_path(race, "results")).await?;
        let mut entries = Vec::new();

        for ergast_race in races {
            let circuit_id = ergast_race
                .circuit
                .as_ref()
                .map(|c| c.circuit_id.clone())
                .unwrap_or_default();
            for row in ergast_race.results {
                let driver_number = parse_int(row.number.as_deref())
                    .or_else(|| parse_int(row.driver.permanent_number.as_deref()));
                entries.push(RaceEntry {
                    race,
                    race_name: ergast_race.race_name.clone(),
                    circuit_id: circuit_id.clone(),
                    date: ergast_race.date.clone(),
                    driver_id: row.driver.driver_id,
                    driver_code: row.driver.code,
                    driver_number,
                    constructor_id: row.constructor.map(|c| c.constructor_id),
                    grid: parse_int(row.grid.as_deref()),
                    position: parse_int(row.position.as_deref()),
                    points: row
                        .points
                        .as_deref()
                        .and_then(|p| p.trim().parse().ok())
                        .unwrap_or(0.0),
                    status: row.status,
                });
            }
        }

        Ok(entries)
    }
}

#[async_trait]
impl SourceAdapter for ResultsApiAdapter {
    fn id(&self) -> SourceId {
        SourceId::ResultsApi
    }

    fn supports(&self, _category: DataCategory) -> bool {
        true
    }

    async fn fetch(
        &self,
        category: DataCategory,
        race: RaceKey,
    ) -> Result<SourceBatch, SourceError> {
        match category {
            DataCategory::Qualifying => self.fetch_qualifying(race).await,
            DataCategory::PitStops => self.fetch_pit_stops(race).await,
            DataCategory::LapTimes => self.fetch_lap_times(race).await,
        }
    }

    fn requests_made(&self) -> u64 {
        self.client.requests_made()
    }
}
