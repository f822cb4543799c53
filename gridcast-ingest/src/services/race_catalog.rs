//! Race catalog scanner
//!
//! Lists the `(season, round)` keys a backfill run should visit. Keys come
//! from the stored roster; seasons with no stored races can be bootstrapped
//! from the results API schedule first.

use crate::db;
use crate::services::persistence_gateway::{PersistenceGateway, StoreTally};
use crate::sources::ResultsApiAdapter;
use crate::types::RaceKey;
use chrono::{NaiveDate, Utc};
use gridcast_common::config::SeasonRange;
use gridcast_common::Result;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

/// Race keys from the store, plus schedule bootstrapping
pub struct RaceCatalog {
    gateway: PersistenceGateway,
    results_api: Option<Arc<ResultsApiAdapter>>,
}

impl RaceCatalog {
    pub fn new(gateway: PersistenceGateway, results_api: Option<Arc<ResultsApiAdapter>>) -> Self {
        Self { gateway, results_api }
    }

    /// Unique race keys stored within `range`, oldest first
    pub async fn list_race_keys(&self, range: SeasonRange) -> Result<Vec<RaceKey>> {
        db::races::race_keys(self.gateway.pool(), range.first, range.last).await
    }

    /// Like [`Self::list_race_keys`], bootstrapping empty seasons first
    ///
    /// Schedule failures are logged and the season is skipped; only store
    /// errors are returned.
    pub async fn list_race_keys_with_bootstrap(&self, range: SeasonRange) -> Result<Vec<RaceKey>> {
        let mut keys: BTreeSet<RaceKey> = self.list_race_keys(range).await?.into_iter().collect();

        for season in range.seasons() {
            if db::races::count_for_season(self.gateway.pool(), season).await? > 0 {
                continue;
            }
            let bootstrapped = self.bootstrap_season(season).await?;
            keys.extend(bootstrapped);
        }

        Ok(keys.into_iter().collect())
    }

    /// Seed roster rows for every completed race of `season`
    ///
    /// Returns the race keys that received at least one roster row.
    pub async fn bootstrap_season(&self, season: i32) -> Result<Vec<RaceKey>> {
        let Some(results_api) = &self.results_api else {
            return Ok(Vec::new());
        };

        let schedule = match results_api.season_schedule(season).await {
            Ok(schedule) => schedule,
            Err(e) => {
                warn!(season, error = %e, "Season schedule unavailable, skipping bootstrap");
                return Ok(Vec::new());
            }
        };

        let today = Utc::now().date_naive();
        let mut seeded = Vec::new();

        for scheduled in schedule {
            let completed = scheduled
                .date
                .as_deref()
                .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok())
                .map(|date| date <= today)
                .unwrap_or(true);
            if !completed {
                continue;
            }

            let entries = match results_api.race_results(scheduled.race).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(race = %scheduled.race, error = %e, "Race results unavailable, skipping");
                    continue;
                }
            };

            let mut tally = StoreTally::default();
            for entry in &entries {
                tally.record(&self.gateway.store_race_entry(entry).await);
            }

            if !entries.is_empty() {
                seeded.push(scheduled.race);
            }
            info!(
                race = %scheduled.race,
                inserted = tally.inserted,
                skipped = tally.skipped_duplicate,
                errored = tally.errored,
                "Roster bootstrapped"
            );
        }

        Ok(seeded)
    }
}
