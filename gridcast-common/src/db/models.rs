//! Canonical record models
//!
//! Every record carries its natural key explicitly. The canonical store
//! enforces one row per natural key; these types are the shape every source
//! adapter maps its native payload into.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One Grand Prix event: `(season, round)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RaceKey {
    pub season: i32,
    pub round: i32,
}

impl RaceKey {
    pub fn new(season: i32, round: i32) -> Self {
        Self { season, round }
    }
}

impl fmt::Display for RaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} R{}", self.season, self.round)
    }
}

/// Data categories reconciled per race
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataCategory {
    Qualifying,
    PitStops,
    LapTimes,
}

impl DataCategory {
    /// Processing order within one race
    pub const ALL: [DataCategory; 3] = [
        DataCategory::Qualifying,
        DataCategory::PitStops,
        DataCategory::LapTimes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataCategory::Qualifying => "qualifying",
            DataCategory::PitStops => "pit_stops",
            DataCategory::LapTimes => "lap_times",
        }
    }

    /// Canonical store table holding this category
    pub fn table_name(&self) -> &'static str {
        self.as_str()
    }
}

impl fmt::Display for DataCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Upstream data sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    /// Historical results API (Ergast-compatible)
    ResultsApi,
    /// Lap-level telemetry API (OpenF1-compatible)
    TelemetryApi,
    /// Session-timing API (whole-session loads)
    SessionTiming,
}

impl SourceId {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceId::ResultsApi => "results_api",
            SourceId::TelemetryApi => "telemetry_api",
            SourceId::SessionTiming => "session_timing",
        }
    }

    /// Human-readable name used in run summaries
    pub fn display_name(&self) -> &'static str {
        match self {
            SourceId::ResultsApi => "Results-API",
            SourceId::TelemetryApi => "Telemetry-API",
            SourceId::SessionTiming => "Session-Timing-API",
        }
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for SourceId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "results_api" => Ok(SourceId::ResultsApi),
            "telemetry_api" => Ok(SourceId::TelemetryApi),
            "session_timing" => Ok(SourceId::SessionTiming),
            other => Err(crate::Error::InvalidInput(format!("Unknown source: {}", other))),
        }
    }
}

/// Qualifying classification of one driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualifyingRecord {
    pub race: RaceKey,
    pub driver_id: String,
    pub position: i32,
    /// Session times kept verbatim as "m:ss.sss" text
    pub q1: Option<String>,
    pub q2: Option<String>,
    pub q3: Option<String>,
}

/// One pit visit of one driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PitStopRecord {
    pub race: RaceKey,
    pub driver_id: String,
    /// 1-based sequence of this driver's pit visits
    pub stop_number: i32,
    pub lap: i32,
    /// Wall-clock time of the stop as reported upstream
    pub time: Option<String>,
    /// Duration as the source reported it
    pub duration: Option<String>,
    /// `None` when the reported duration could not be parsed
    pub duration_millis: Option<i64>,
}

/// One lap of one driver
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LapTimeRecord {
    pub race: RaceKey,
    pub driver_id: String,
    pub lap_number: i32,
    /// Running classification at the end of this lap; `None` when the
    /// source gave none and it could not be derived
    pub position: Option<i32>,
    pub time: String,
    pub time_millis: i64,
}

/// A record in canonical shape, tagged by category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum NormalizedRecord {
    Qualifying(QualifyingRecord),
    PitStop(PitStopRecord),
    LapTime(LapTimeRecord),
}

impl NormalizedRecord {
    pub fn category(&self) -> DataCategory {
        match self {
            NormalizedRecord::Qualifying(_) => DataCategory::Qualifying,
            NormalizedRecord::PitStop(_) => DataCategory::PitStops,
            NormalizedRecord::LapTime(_) => DataCategory::LapTimes,
        }
    }

    pub fn race(&self) -> RaceKey {
        match self {
            NormalizedRecord::Qualifying(r) => r.race,
            NormalizedRecord::PitStop(r) => r.race,
            NormalizedRecord::LapTime(r) => r.race,
        }
    }

    pub fn driver_id(&self) -> &str {
        match self {
            NormalizedRecord::Qualifying(r) => &r.driver_id,
            NormalizedRecord::PitStop(r) => &r.driver_id,
            NormalizedRecord::LapTime(r) => &r.driver_id,
        }
    }

    /// Natural key rendered for log lines
    pub fn natural_key(&self) -> String {
        match self {
            NormalizedRecord::Qualifying(r) => {
                format!("{}/{}/{}", r.race.season, r.race.round, r.driver_id)
            }
            NormalizedRecord::PitStop(r) => format!(
                "{}/{}/{}/stop{}",
                r.race.season, r.race.round, r.driver_id, r.stop_number
            ),
            NormalizedRecord::LapTime(r) => format!(
                "{}/{}/{}/lap{}",
                r.race.season, r.race.round, r.driver_id, r.lap_number
            ),
        }
    }
}

/// Classified race result of one driver (the `races` table)
///
/// Seeded from the results API schedule bootstrap. Source adapters join
/// against these rows to resolve driver numbers and abbreviations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RaceEntry {
    pub race: RaceKey,
    pub race_name: String,
    pub circuit_id: String,
    pub date: Option<String>,
    pub driver_id: String,
    pub driver_code: Option<String>,
    pub driver_number: Option<i32>,
    pub constructor_id: Option<String>,
    pub grid: Option<i32>,
    pub position: Option<i32>,
    pub points: f64,
    pub status: Option<String>,
}

/// One driver's reconciled feature vector for one race
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedFeatureRow {
    pub race: RaceKey,
    pub driver_id: String,
    pub constructor_id: Option<String>,
    pub circuit_id: String,
    pub grid: i32,
    pub qualifying_position: i32,
    pub pit_stop_count: i32,
    pub mean_pit_duration_millis: f64,
    /// Driver mean lap time over the session-best lap
    pub pace_ratio: f64,
    /// Standard deviation of lap time over the session-best lap
    pub pace_std_ratio: f64,
    pub grid_penalty: i32,
    /// Prior races by this driver at this circuit
    pub circuit_experience: i32,
    /// Mean points of the driver's previous three races
    pub driver_form: f64,
    /// Mean per-race points total of the constructor over its previous three races
    pub constructor_form: f64,
    pub has_qualifying: bool,
    pub has_pit_stops: bool,
    pub has_lap_times: bool,
    /// Outcome labels, present for completed races
    pub finish_position: Option<i32>,
    pub points: f64,
}
