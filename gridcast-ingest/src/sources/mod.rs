//! Upstream source adapters
//!
//! Three adapters, one per upstream API. Each maps its native payload into
//! canonical records; the helpers here hold the mapping steps they share:
//! stop numbering and running-position derivation.

pub mod results_api;
pub mod session_timing;
pub mod telemetry_api;

pub use results_api::{ResultsApiAdapter, ScheduledRace};
pub use session_timing::SessionTimingAdapter;
pub use telemetry_api::TelemetryApiAdapter;

use crate::types::{LapTimeRecord, PitStopRecord, RaceKey};
use std::collections::{BTreeMap, HashMap};

/// Pit stop mapped from a source, stop index not yet settled
#[derive(Debug, Clone)]
pub(crate) struct PendingPitStop {
    pub driver_id: String,
    /// Index reported by the source, if any
    pub stop_number: Option<i32>,
    pub lap: i32,
    pub time: Option<String>,
    pub duration: Option<String>,
    pub duration_millis: Option<i64>,
}

/// Settle stop numbers
///
/// A driver whose stops all carry explicit indices keeps them. Otherwise
/// that driver's stops are numbered 1..n in lap order.
pub(crate) fn assign_stop_numbers(race: RaceKey, stops: Vec<PendingPitStop>) -> Vec<PitStopRecord> {
    let mut by_driver: BTreeMap<String, Vec<PendingPitStop>> = BTreeMap::new();
    for stop in stops {
        by_driver.entry(stop.driver_id.clone()).or_default().push(stop);
    }

    let mut records = Vec::new();
    for (driver_id, mut driver_stops) in by_driver {
        let all_explicit = driver_stops.iter().all(|s| s.stop_number.is_some());
        if all_explicit {
            driver_stops.sort_by_key(|s| (s.stop_number, s.lap));
        } else {
            driver_stops.sort_by_key(|s| s.lap);
        }

        for (index, stop) in driver_stops.into_iter().enumerate() {
            let stop_number = if all_explicit {
                stop.stop_number.unwrap_or(index as i32 + 1)
            } else {
                index as i32 + 1
            };
            records.push(PitStopRecord {
                race,
                driver_id: driver_id.clone(),
                stop_number,
                lap: stop.lap,
                time: stop.time,
                duration: stop.duration,
                duration_millis: stop.duration_millis,
            });
        }
    }

    records
}

/// Lap mapped from a source, running position possibly unknown
#[derive(Debug, Clone)]
pub(crate) struct PendingLap {
    pub driver_id: String,
    pub lap_number: i32,
    pub position: Option<i32>,
    pub time: String,
    pub time_millis: i64,
    /// When the lap ended, in milliseconds on a clock shared by the session
    pub completed_at: Option<i64>,
}

/// Fill missing running positions
///
/// At each lap, drivers who completed it are ranked by when they crossed
/// the line. Completion timestamps are used when every finisher of that lap
/// has one. Otherwise elapsed race time is used, which is only known while
/// a driver's laps run unbroken from lap 1. A lap where neither ordering
/// covers every finisher gets no derived positions. Positions the source
/// reported are kept as-is.
pub(crate) fn finalize_laps(race: RaceKey, laps: Vec<PendingLap>) -> Vec<LapTimeRecord> {
    let mut derived: HashMap<(String, i32), i32> = HashMap::new();

    if laps.iter().any(|lap| lap.position.is_none()) {
        let mut by_driver: HashMap<&str, Vec<&PendingLap>> = HashMap::new();
        for lap in &laps {
            by_driver.entry(lap.driver_id.as_str()).or_default().push(lap);
        }

        // (driver, completed_at, elapsed) per lap number
        let mut crossings: BTreeMap<i32, Vec<(&str, Option<i64>, Option<i64>)>> = BTreeMap::new();
        for (driver_id, mut driver_laps) in by_driver {
            driver_laps.sort_by_key(|lap| lap.lap_number);
            let mut elapsed = Some(0i64);
            let mut expected = 1;
            for lap in driver_laps {
                elapsed = elapsed
                    .filter(|_| lap.lap_number == expected)
                    .map(|e| e + lap.time_millis);
                expected = lap.lap_number + 1;
                crossings
                    .entry(lap.lap_number)
                    .or_default()
                    .push((driver_id, lap.completed_at, elapsed));
            }
        }

        for (lap_number, finishers) in crossings {
            let by_timestamp: Option<Vec<(i64, &str)>> = finishers
                .iter()
                .map(|(driver, completed_at, _)| completed_at.map(|t| (t, *driver)))
                .collect();
            let by_elapsed = || -> Option<Vec<(i64, &str)>> {
                finishers
                    .iter()
                    .map(|(driver, _, elapsed)| elapsed.map(|e| (e, *driver)))
                    .collect()
            };
            let Some(mut standings) = by_timestamp.or_else(by_elapsed) else {
                continue;
            };
            standings.sort();
            for (rank, (_, driver_id)) in standings.into_iter().enumerate() {
                derived.insert((driver_id.to_string(), lap_number), rank as i32 + 1);
            }
        }
    }

    let mut records: Vec<LapTimeRecord> = laps
        .into_iter()
        .map(|lap| {
            let position = lap
                .position
                .or_else(|| derived.get(&(lap.driver_id.clone(), lap.lap_number)).copied());
            LapTimeRecord {
                race,
                driver_id: lap.driver_id,
                lap_number: lap.lap_number,
                position,
                time: lap.time,
                time_millis: lap.time_millis,
            }
        })
        .collect();

    records.sort_by(|a, b| {
        (a.lap_number, a.position.is_none(), a.position, &a.driver_id).cmp(&(
            b.lap_number,
            b.position.is_none(),
            b.position,
            &b.driver_id,
        ))
    });
    records
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pending_stop(driver: &str, stop: Option<i32>, lap: i32) -> PendingPitStop {
        PendingPitStop {
            driver_id: driver.to_string(),
            stop_number: stop,
            lap,
            time: None,
            duration: None,
            duration_millis: None,
        }
    }

    fn pending_lap(driver: &str, lap: i32, millis: i64, position: Option<i32>) -> PendingLap {
        PendingLap {
            driver_id: driver.to_string(),
            lap_number: lap,
            position,
            time: gridcast_common::time::format_lap_time(millis),
            time_millis: millis,
            completed_at: None,
        }
    }

    fn timed_lap(driver: &str, lap: i32, millis: i64, completed_at: i64) -> PendingLap {
        PendingLap {
            completed_at: Some(completed_at),
            ..pending_lap(driver, lap, millis, None)
        }
    }

    fn position_of(records: &[LapTimeRecord], driver: &str, lap: i32) -> Option<i32> {
        records
            .iter()
            .find(|r| r.driver_id == driver && r.lap_number == lap)
            .and_then(|r| r.position)
    }

    #[test]
    fn test_missing_stop_numbers_follow_lap_order() {
        let race = RaceKey::new(2023, 5);
        let records = assign_stop_numbers(
            race,
            vec![
                pending_stop("max_verstappen", None, 44),
                pending_stop("max_verstappen", None, 12),
                pending_stop("leclerc", None, 20),
            ],
        );

        let verstappen: Vec<(i32, i32)> = records
            .iter()
            .filter(|r| r.driver_id == "max_verstappen")
            .map(|r| (r.stop_number, r.lap))
            .collect();
        assert_eq!(verstappen, vec![(1, 12), (2, 44)]);

        let leclerc = records.iter().find(|r| r.driver_id == "leclerc").unwrap();
        assert_eq!(leclerc.stop_number, 1);
    }

    #[test]
    fn test_explicit_stop_numbers_are_kept() {
        let records = assign_stop_numbers(
            RaceKey::new(2023, 5),
            vec![pending_stop("albon", Some(2), 30), pending_stop("albon", Some(1), 10)],
        );
        let numbers: Vec<i32> = records.iter().map(|r| r.stop_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[test]
    fn test_partially_numbered_driver_is_renumbered() {
        let records = assign_stop_numbers(
            RaceKey::new(2023, 5),
            vec![pending_stop("ocon", Some(1), 40), pending_stop("ocon", None, 15)],
        );
        let numbers: Vec<(i32, i32)> = records.iter().map(|r| (r.stop_number, r.lap)).collect();
        assert_eq!(numbers, vec![(1, 15), (2, 40)]);
    }

    #[test]
    fn test_positions_derived_from_cumulative_time() {
        let race = RaceKey::new(2024, 1);
        let records = finalize_laps(
            race,
            vec![
                pending_lap("a", 1, 95_000, None),
                pending_lap("b", 1, 94_000, None),
                pending_lap("a", 2, 90_000, None),
                pending_lap("b", 2, 92_000, None),
            ],
        );

        assert_eq!(position_of(&records, "b", 1), Some(1));
        assert_eq!(position_of(&records, "a", 1), Some(2));
        // a: 185.0s, b: 186.0s after two laps
        assert_eq!(position_of(&records, "a", 2), Some(1));
        assert_eq!(position_of(&records, "b", 2), Some(2));
    }

    #[test]
    fn test_unrecorded_first_lap_ranks_by_completion_time() {
        // Lap 1 has no duration for either driver; a crossed the line 5s
        // ahead of b and keeps 4s of that after b's faster lap 2
        let records = finalize_laps(
            RaceKey::new(2023, 16),
            vec![
                timed_lap("a", 2, 92_000, 1_000_000 + 92_000),
                timed_lap("b", 2, 91_000, 1_005_000 + 91_000),
            ],
        );

        assert_eq!(position_of(&records, "a", 2), Some(1));
        assert_eq!(position_of(&records, "b", 2), Some(2));
    }

    #[test]
    fn test_gap_without_timestamps_leaves_position_unknown() {
        let records = finalize_laps(
            RaceKey::new(2023, 16),
            vec![
                pending_lap("a", 2, 92_000, None),
                pending_lap("b", 1, 96_000, None),
                pending_lap("b", 2, 91_000, None),
            ],
        );

        assert_eq!(position_of(&records, "b", 1), Some(1));
        assert_eq!(position_of(&records, "a", 2), None);
        assert_eq!(position_of(&records, "b", 2), None, "a may be ahead of b");
    }

    #[test]
    fn test_reported_positions_are_not_overwritten() {
        let records = finalize_laps(
            RaceKey::new(2024, 1),
            vec![pending_lap("a", 1, 99_000, Some(1)), pending_lap("b", 1, 94_000, Some(2))],
        );
        assert_eq!(position_of(&records, "a", 1), Some(1));
    }
}
