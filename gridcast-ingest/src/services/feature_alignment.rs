//! Feature alignment layer
//!
//! Joins a race's roster with its qualifying, pit stop and lap time records
//! into one [`AlignedFeatureRow`] per driver, every numeric feature in one
//! unit system. Reads the canonical store only; no network I/O.
//!
//! Missing categories fall back to neutral sentinels:
//!
//! | Missing        | Sentinel                                          |
//! |----------------|---------------------------------------------------|
//! | qualifying     | grid position, or [`DEFAULT_GRID_POSITION`]       |
//! | pit stops      | 0 stops, [`DEFAULT_MEAN_PIT_DURATION_MILLIS`]     |
//! | lap times      | [`DEFAULT_PACE_RATIO`], std ratio 0.0             |

use crate::db;
use crate::services::race_catalog::RaceCatalog;
use crate::types::{
    AlignedFeatureRow, LapTimeRecord, PitStopRecord, QualifyingRecord, RaceEntry, RaceKey,
};
use gridcast_common::config::SeasonRange;
use gridcast_common::Result;
use sqlx::SqlitePool;
use std::collections::HashMap;
use tracing::{debug, info};

/// Pace ratio for drivers without lap data ("slightly below average")
pub const DEFAULT_PACE_RATIO: f64 = 1.05;
pub const DEFAULT_PACE_STD_RATIO: f64 = 0.0;
pub const DEFAULT_MEAN_PIT_DURATION_MILLIS: f64 = 25_000.0;
/// Back of a 20-car grid
pub const DEFAULT_GRID_POSITION: i32 = 20;
/// Races averaged for driver and constructor form
pub const FORM_WINDOW: i64 = 3;

/// Prior-race attributes for one driver, looked up before `race`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DriverHistory {
    pub circuit_experience: i32,
    pub driver_form: f64,
    pub constructor_form: f64,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

/// Population standard deviation
fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(variance.sqrt())
}

/// Align one race from already-loaded records
///
/// One row per roster entry; records for drivers missing from the roster
/// are ignored.
pub fn align_rows(
    race: RaceKey,
    entries: &[RaceEntry],
    qualifying: &[QualifyingRecord],
    pit_stops: &[PitStopRecord],
    lap_times: &[LapTimeRecord],
    history: &HashMap<String, DriverHistory>,
) -> Vec<AlignedFeatureRow> {
    let quali_by_driver: HashMap<&str, i32> = qualifying
        .iter()
        .filter(|q| q.race == race)
        .map(|q| (q.driver_id.as_str(), q.position))
        .collect();

    let mut pits_by_driver: HashMap<&str, Vec<&PitStopRecord>> = HashMap::new();
    for stop in pit_stops.iter().filter(|p| p.race == race) {
        pits_by_driver.entry(stop.driver_id.as_str()).or_default().push(stop);
    }

    let mut laps_by_driver: HashMap<&str, Vec<f64>> = HashMap::new();
    for lap in lap_times.iter().filter(|l| l.race == race && l.time_millis > 0) {
        laps_by_driver
            .entry(lap.driver_id.as_str())
            .or_default()
            .push(lap.time_millis as f64);
    }
    let session_best = lap_times
        .iter()
        .filter(|l| l.race == race && l.time_millis > 0)
        .map(|l| l.time_millis)
        .min()
        .map(|ms| ms as f64);

    entries
        .iter()
        .filter(|e| e.race == race)
        .map(|entry| {
            let driver = entry.driver_id.as_str();
            let grid = entry
                .grid
                .filter(|g| *g > 0)
                .unwrap_or(DEFAULT_GRID_POSITION);

            let quali = quali_by_driver.get(driver).copied();
            let qualifying_position = quali.unwrap_or(grid);

            let (pit_stop_count, mean_pit_duration_millis, has_pit_stops) =
                match pits_by_driver.get(driver) {
                    Some(stops) => {
                        let durations: Vec<f64> = stops
                            .iter()
                            .filter_map(|s| s.duration_millis)
                            .map(|ms| ms as f64)
                            .collect();
                        (
                            stops.len() as i32,
                            mean(&durations).unwrap_or(DEFAULT_MEAN_PIT_DURATION_MILLIS),
                            true,
                        )
                    }
                    None => (0, DEFAULT_MEAN_PIT_DURATION_MILLIS, false),
                };

            let (pace_ratio, pace_std_ratio, has_lap_times) =
                match (laps_by_driver.get(driver), session_best) {
                    (Some(laps), Some(best)) => (
                        mean(laps).map(|m| m / best).unwrap_or(DEFAULT_PACE_RATIO),
                        std_dev(laps).map(|s| s / best).unwrap_or(DEFAULT_PACE_STD_RATIO),
                        true,
                    ),
                    _ => (DEFAULT_PACE_RATIO, DEFAULT_PACE_STD_RATIO, false),
                };

            let past = history.get(driver).cloned().unwrap_or_default();

            AlignedFeatureRow {
                race,
                driver_id: entry.driver_id.clone(),
                constructor_id: entry.constructor_id.clone(),
                circuit_id: entry.circuit_id.clone(),
                grid,
                qualifying_position,
                pit_stop_count,
                mean_pit_duration_millis,
                pace_ratio,
                pace_std_ratio,
                grid_penalty: grid - qualifying_position,
                circuit_experience: past.circuit_experience,
                driver_form: past.driver_form,
                constructor_form: past.constructor_form,
                has_qualifying: quali.is_some(),
                has_pit_stops,
                has_lap_times,
                finish_position: entry.position,
                points: entry.points,
            }
        })
        .collect()
}

/// Store-backed alignment
pub struct FeatureAligner {
    pool: SqlitePool,
}

impl FeatureAligner {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn history_for(
        &self,
        race: RaceKey,
        entries: &[RaceEntry],
    ) -> Result<HashMap<String, DriverHistory>> {
        let pool = &self.pool;
        let mut history = HashMap::new();
        let mut constructor_cache: HashMap<String, f64> = HashMap::new();

        for entry in entries {
            let circuit_experience =
                db::races::circuit_experience(pool, race, &entry.driver_id, &entry.circuit_id)
                    .await?;
            let driver_points =
                db::races::recent_driver_points(pool, race, &entry.driver_id, FORM_WINDOW).await?;

            let constructor_form = match &entry.constructor_id {
                Some(constructor) => match constructor_cache.get(constructor) {
                    Some(form) => *form,
                    None => {
                        let totals = db::races::recent_constructor_points(
                            pool,
                            race,
                            constructor,
                            FORM_WINDOW,
                        )
                        .await?;
                        let form = mean(&totals).unwrap_or(0.0);
                        constructor_cache.insert(constructor.clone(), form);
                        form
                    }
                },
                None => 0.0,
            };

            history.insert(
                entry.driver_id.clone(),
                DriverHistory {
                    circuit_experience: circuit_experience as i32,
                    driver_form: mean(&driver_points).unwrap_or(0.0),
                    constructor_form,
                },
            );
        }

        Ok(history)
    }

    /// Feature rows for one race, computed from the canonical store
    pub async fn project(&self, race: RaceKey) -> Result<Vec<AlignedFeatureRow>> {
        let entries = db::races::entries_for_race(&self.pool, race).await?;
        if entries.is_empty() {
            debug!(%race, "No roster stored, nothing to align");
            return Ok(Vec::new());
        }

        let qualifying = db::qualifying::for_race(&self.pool, race).await?;
        let pit_stops = db::pit_stops::for_race(&self.pool, race).await?;
        let lap_times = db::lap_times::for_race(&self.pool, race).await?;
        let history = self.history_for(race, &entries).await?;

        Ok(align_rows(race, &entries, &qualifying, &pit_stops, &lap_times, &history))
    }

    /// Project and replace the stored rows of one race
    pub async fn rebuild(&self, race: RaceKey) -> Result<Vec<AlignedFeatureRow>> {
        let rows = self.project(race).await?;
        db::features::replace_race(&self.pool, race, &rows).await?;
        debug!(%race, rows = rows.len(), "Aligned features rebuilt");
        Ok(rows)
    }

    /// Rebuild every race the catalog lists in `range`; returns rows written
    pub async fn project_range(&self, catalog: &RaceCatalog, range: SeasonRange) -> Result<usize> {
        let races = catalog.list_race_keys(range).await?;
        let mut written = 0;
        for race in &races {
            written += self.rebuild(*race).await?.len();
        }
        info!(races = races.len(), rows = written, "Feature alignment complete");
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RACE: RaceKey = RaceKey { season: 2023, round: 5 };

    fn entry(driver_id: &str, grid: Option<i32>) -> RaceEntry {
        RaceEntry {
            race: RACE,
            race_name: "Miami Grand Prix".to_string(),
            circuit_id: "miami".to_string(),
            date: Some("2023-05-07".to_string()),
            driver_id: driver_id.to_string(),
            driver_code: None,
            driver_number: None,
            constructor_id: Some("red_bull".to_string()),
            grid,
            position: Some(1),
            points: 25.0,
            status: Some("Finished".to_string()),
        }
    }

    fn lap(driver_id: &str, lap_number: i32, time_millis: i64) -> LapTimeRecord {
        LapTimeRecord {
            race: RACE,
            driver_id: driver_id.to_string(),
            lap_number,
            position: Some(1),
            time: String::new(),
            time_millis,
        }
    }

    #[test]
    fn test_missing_categories_use_sentinels() {
        let rows = align_rows(RACE, &[entry("sargeant", None)], &[], &[], &[], &HashMap::new());

        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row.grid, DEFAULT_GRID_POSITION);
        assert_eq!(row.qualifying_position, DEFAULT_GRID_POSITION);
        assert_eq!(row.grid_penalty, 0);
        assert_eq!(row.pit_stop_count, 0);
        assert_eq!(row.mean_pit_duration_millis, DEFAULT_MEAN_PIT_DURATION_MILLIS);
        assert_eq!(row.pace_ratio, DEFAULT_PACE_RATIO);
        assert_eq!(row.pace_std_ratio, 0.0);
        assert!(!row.has_qualifying && !row.has_pit_stops && !row.has_lap_times);
    }

    #[test]
    fn test_qualifying_falls_back_to_grid() {
        let rows = align_rows(RACE, &[entry("perez", Some(9))], &[], &[], &[], &HashMap::new());
        assert_eq!(rows[0].qualifying_position, 9);
    }

    #[test]
    fn test_grid_penalty_and_pits() {
        let quali = QualifyingRecord {
            race: RACE,
            driver_id: "max_verstappen".to_string(),
            position: 9,
            q1: None,
            q2: None,
            q3: None,
        };
        let stop = |n: i32, ms: i64| PitStopRecord {
            race: RACE,
            driver_id: "max_verstappen".to_string(),
            stop_number: n,
            lap: 20 * n,
            time: None,
            duration: None,
            duration_millis: Some(ms),
        };

        let rows = align_rows(
            RACE,
            &[entry("max_verstappen", Some(9))],
            &[quali],
            &[stop(1, 21_000), stop(2, 23_000)],
            &[],
            &HashMap::new(),
        );

        assert_eq!(rows[0].grid_penalty, 0);
        assert_eq!(rows[0].pit_stop_count, 2);
        assert_eq!(rows[0].mean_pit_duration_millis, 22_000.0);
        assert!(rows[0].has_qualifying);
    }

    #[test]
    fn test_pace_ratio_against_session_best() {
        let laps = vec![
            lap("max_verstappen", 1, 90_000),
            lap("max_verstappen", 2, 90_000),
            lap("perez", 1, 99_000),
            lap("perez", 2, 99_000),
        ];
        let rows = align_rows(
            RACE,
            &[entry("max_verstappen", Some(1)), entry("perez", Some(2))],
            &[],
            &[],
            &laps,
            &HashMap::new(),
        );

        let by_driver: HashMap<_, _> = rows.iter().map(|r| (r.driver_id.as_str(), r)).collect();
        assert!((by_driver["max_verstappen"].pace_ratio - 1.0).abs() < 1e-9);
        assert!((by_driver["perez"].pace_ratio - 1.1).abs() < 1e-9);
        assert_eq!(by_driver["perez"].pace_std_ratio, 0.0);
        assert!(by_driver["perez"].has_lap_times);
    }

    #[test]
    fn test_history_is_carried() {
        let mut history = HashMap::new();
        history.insert(
            "alonso".to_string(),
            DriverHistory {
                circuit_experience: 1,
                driver_form: 15.0,
                constructor_form: 27.0,
            },
        );
        let rows = align_rows(RACE, &[entry("alonso", Some(3))], &[], &[], &[], &history);
        assert_eq!(rows[0].circuit_experience, 1);
        assert_eq!(rows[0].driver_form, 15.0);
        assert_eq!(rows[0].constructor_form, 27.0);
    }
}
