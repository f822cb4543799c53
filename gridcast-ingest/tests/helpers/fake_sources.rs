//! Scripted source adapters
//!
//! Each fake answers per `(category, race)` from a script, falling back to
//! a default, and records every call it receives.

use async_trait::async_trait;
use gridcast_common::time::format_lap_time;
use gridcast_ingest::error::SourceError;
use gridcast_ingest::types::{
    DataCategory, LapTimeRecord, NormalizedRecord, PitStopRecord, QualifyingRecord, RaceKey,
    SourceAdapter, SourceBatch, SourceId,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::db_utils::driver_id;

/// How a fake answers one fetch
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Script {
    /// Legitimately no data
    Empty,
    /// One record per driver `driver_01..driver_N`
    Rows(usize),
    /// Transient failure after retries
    Down,
}

pub struct ScriptedSource {
    id: SourceId,
    categories: Vec<DataCategory>,
    default: Script,
    scripts: HashMap<(DataCategory, RaceKey), Script>,
    calls: Mutex<Vec<(DataCategory, RaceKey)>>,
}

impl ScriptedSource {
    pub fn new(id: SourceId, default: Script) -> Self {
        Self {
            id,
            categories: DataCategory::ALL.to_vec(),
            default,
            scripts: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn supporting(mut self, categories: &[DataCategory]) -> Self {
        self.categories = categories.to_vec();
        self
    }

    pub fn with(mut self, category: DataCategory, race: RaceKey, script: Script) -> Self {
        self.scripts.insert((category, race), script);
        self
    }

    /// Same script for every category of `race`
    pub fn with_race(mut self, race: RaceKey, script: Script) -> Self {
        for category in DataCategory::ALL {
            self.scripts.insert((category, race), script);
        }
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn calls(&self) -> Vec<(DataCategory, RaceKey)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, category: DataCategory) -> usize {
        self.calls().iter().filter(|(c, _)| *c == category).count()
    }
}

/// Canonical records a source with data would return
pub fn records(category: DataCategory, race: RaceKey, drivers: usize) -> Vec<NormalizedRecord> {
    (1..=drivers)
        .map(|i| match category {
            DataCategory::Qualifying => NormalizedRecord::Qualifying(QualifyingRecord {
                race,
                driver_id: driver_id(i),
                position: i as i32,
                q1: Some(format!("1:{:02}.000", 20 + i)),
                q2: None,
                q3: None,
            }),
            DataCategory::PitStops => NormalizedRecord::PitStop(PitStopRecord {
                race,
                driver_id: driver_id(i),
                stop_number: 1,
                lap: 20,
                time: None,
                duration: Some("22.5".to_string()),
                duration_millis: Some(22_500),
            }),
            DataCategory::LapTimes => NormalizedRecord::LapTime(LapTimeRecord {
                race,
                driver_id: driver_id(i),
                lap_number: 1,
                position: Some(i as i32),
                time: format_lap_time(90_000 + i as i64 * 1_000),
                time_millis: 90_000 + i as i64 * 1_000,
            }),
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for ScriptedSource {
    fn id(&self) -> SourceId {
        self.id
    }

    fn supports(&self, category: DataCategory) -> bool {
        self.categories.contains(&category)
    }

    async fn fetch(
        &self,
        category: DataCategory,
        race: RaceKey,
    ) -> Result<SourceBatch, SourceError> {
        self.calls.lock().unwrap().push((category, race));
        let script = self.scripts.get(&(category, race)).copied().unwrap_or(self.default);
        match script {
            Script::Empty => Ok(SourceBatch::empty()),
            Script::Rows(n) => Ok(SourceBatch::new(records(category, race, n), vec![])),
            Script::Down => Err(SourceError::Unavailable {
                attempts: 5,
                reason: "HTTP 503 Service Unavailable".to_string(),
            }),
        }
    }

    fn requests_made(&self) -> u64 {
        self.calls.lock().unwrap().len() as u64
    }
}
