//! Deduplicating persistence gateway
//!
//! Every write checks the natural key first and inserts only when absent.
//! Records are never updated in place: the first writer wins.
//!
//! A single record failing is reported as [`StoreOutcome::Error`] and
//! never aborts its batch. A concurrent duplicate that slips past the
//! existence check is caught by the table's UNIQUE constraint and reported
//! as a duplicate, not an error.

use crate::db;
use crate::types::{DataCategory, NormalizedRecord, RaceEntry, RaceKey, SourceId};
use crate::utils::retry_on_lock;
use gridcast_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::warn;

/// Outcome of storing one record
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome {
    Inserted,
    SkippedDuplicate,
    Error(String),
}

/// Per-batch counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreTally {
    pub inserted: u64,
    pub skipped_duplicate: u64,
    pub errored: u64,
}

impl StoreTally {
    pub fn record(&mut self, outcome: &StoreOutcome) {
        match outcome {
            StoreOutcome::Inserted => self.inserted += 1,
            StoreOutcome::SkippedDuplicate => self.skipped_duplicate += 1,
            StoreOutcome::Error(_) => self.errored += 1,
        }
    }
}

fn is_unique_violation(err: &Error) -> bool {
    match err {
        Error::Database(sqlx::Error::Database(db_err)) => db_err.is_unique_violation(),
        _ => false,
    }
}

/// Insert-only gateway over the canonical store
#[derive(Clone)]
pub struct PersistenceGateway {
    pool: SqlitePool,
    lock_wait_ms: u64,
}

impl PersistenceGateway {
    pub fn new(pool: SqlitePool, lock_wait_ms: u64) -> Self {
        Self { pool, lock_wait_ms }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of `category` records stored for `race`
    ///
    /// Errors here mean the store itself is unreachable.
    pub async fn stored_count(&self, category: DataCategory, race: RaceKey) -> Result<u64> {
        let count = match category {
            DataCategory::Qualifying => db::qualifying::count_for_race(&self.pool, race).await?,
            DataCategory::PitStops => db::pit_stops::count_for_race(&self.pool, race).await?,
            DataCategory::LapTimes => db::lap_times::count_for_race(&self.pool, race).await?,
        };
        Ok(count.max(0) as u64)
    }

    /// Whether any record of `category` is stored for `race`
    pub async fn has_category(&self, category: DataCategory, race: RaceKey) -> Result<bool> {
        Ok(self.stored_count(category, race).await? > 0)
    }

    async fn insert_if_absent(
        &self,
        record: &NormalizedRecord,
        source: SourceId,
    ) -> Result<StoreOutcome> {
        let pool = &self.pool;
        let exists = match record {
            NormalizedRecord::Qualifying(r) => {
                db::qualifying::exists(pool, r.race, &r.driver_id).await?
            }
            NormalizedRecord::PitStop(r) => {
                db::pit_stops::exists(pool, r.race, &r.driver_id, r.stop_number).await?
            }
            NormalizedRecord::LapTime(r) => {
                db::lap_times::exists(pool, r.race, &r.driver_id, r.lap_number).await?
            }
        };
        if exists {
            return Ok(StoreOutcome::SkippedDuplicate);
        }

        let inserted = match record {
            NormalizedRecord::Qualifying(r) => db::qualifying::insert(pool, r, source).await,
            NormalizedRecord::PitStop(r) => db::pit_stops::insert(pool, r, source).await,
            NormalizedRecord::LapTime(r) => db::lap_times::insert(pool, r, source).await,
        };

        match inserted {
            Ok(()) => Ok(StoreOutcome::Inserted),
            Err(e) if is_unique_violation(&e) => Ok(StoreOutcome::SkippedDuplicate),
            Err(e) => Err(e),
        }
    }

    /// Store one record: `Inserted`, `SkippedDuplicate`, or `Error`
    pub async fn store(&self, record: &NormalizedRecord, source: SourceId) -> StoreOutcome {
        let result = retry_on_lock("store record", self.lock_wait_ms, || {
            self.insert_if_absent(record, source)
        })
        .await;

        match result {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(
                    category = %record.category(),
                    key = %record.natural_key(),
                    %source,
                    error = %e,
                    "Failed to store record"
                );
                StoreOutcome::Error(e.to_string())
            }
        }
    }

    /// Store every record, tallying outcomes
    pub async fn store_batch(&self, records: &[NormalizedRecord], source: SourceId) -> StoreTally {
        let mut tally = StoreTally::default();
        for record in records {
            let outcome = self.store(record, source).await;
            tally.record(&outcome);
        }
        tally
    }

    /// Store one roster row under the same first-writer-wins rule
    pub async fn store_race_entry(&self, entry: &RaceEntry) -> StoreOutcome {
        let result = retry_on_lock("store race entry", self.lock_wait_ms, || async {
            if db::races::exists(&self.pool, entry.race, &entry.driver_id).await? {
                return Ok(StoreOutcome::SkippedDuplicate);
            }
            match db::races::insert(&self.pool, entry).await {
                Ok(()) => Ok(StoreOutcome::Inserted),
                Err(e) if is_unique_violation(&e) => Ok(StoreOutcome::SkippedDuplicate),
                Err(e) => Err(e),
            }
        })
        .await;

        result.unwrap_or_else(|e| {
            warn!(
                race = %entry.race,
                driver_id = %entry.driver_id,
                error = %e,
                "Failed to store race entry"
            );
            StoreOutcome::Error(e.to_string())
        })
    }
}
