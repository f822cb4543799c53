//! Backfill orchestrator
//!
//! Drives every `(race, category)` pair through:
//!
//! ```text
//! NOT_CHECKED ──(already stored)──────────────────────────▶ SATISFIED
//! NOT_CHECKED ──▶ ACQUIRING ──▶ PERSISTING ───────────────▶ SATISFIED
//!                 ACQUIRING ──(every source empty/failed)─▶ UNSATISFIED
//! ```
//!
//! Races are visited oldest first, categories independently. A category
//! that ends UNSATISFIED is recorded and never blocks the next one. The
//! only error that stops a run is the canonical store becoming unreachable.

pub mod statistics;

use crate::db;
use crate::error::OrchestratorError;
use crate::services::fallback_coordinator::{Acquisition, FallbackCoordinator};
use crate::services::persistence_gateway::PersistenceGateway;
use crate::services::race_catalog::RaceCatalog;
use crate::types::{DataCategory, RaceKey};
use chrono::Utc;
use gridcast_common::config::{BackfillConfig, SeasonRange};
use std::time::Duration;
use tracing::{debug, info, warn};

pub use statistics::{BackfillReport, CategoryOutcome, CategoryStats, RaceOutcome, SourceStats};

/// Courtesy pauses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub between_races: Duration,
    pub between_categories: Duration,
}

impl Pacing {
    /// No pauses (tests, local sources)
    pub fn none() -> Self {
        Self {
            between_races: Duration::ZERO,
            between_categories: Duration::ZERO,
        }
    }
}

impl From<&BackfillConfig> for Pacing {
    fn from(config: &BackfillConfig) -> Self {
        Self {
            between_races: Duration::from_millis(config.race_delay_ms),
            between_categories: Duration::from_millis(config.category_delay_ms),
        }
    }
}

/// Sequential backfill over race keys
pub struct BackfillOrchestrator {
    coordinator: FallbackCoordinator,
    gateway: PersistenceGateway,
    catalog: RaceCatalog,
    pacing: Pacing,
}

impl BackfillOrchestrator {
    pub fn new(
        coordinator: FallbackCoordinator,
        gateway: PersistenceGateway,
        catalog: RaceCatalog,
        pacing: Pacing,
    ) -> Self {
        Self {
            coordinator,
            gateway,
            catalog,
            pacing,
        }
    }

    /// Backfill every race in `range`, optionally bootstrapping empty
    /// seasons from the schedule; the report is also saved to run history
    pub async fn run(
        &self,
        range: SeasonRange,
        bootstrap: bool,
    ) -> Result<BackfillReport, OrchestratorError> {
        info!(first_season = range.first, last_season = range.last, bootstrap, "Starting backfill");

        let races = if bootstrap {
            self.catalog.list_race_keys_with_bootstrap(range).await?
        } else {
            self.catalog.list_race_keys(range).await?
        };
        info!(races = races.len(), "Race keys to check");

        let report = self.run_races(&races).await?;
        self.save_report(range, &report).await?;
        Ok(report)
    }

    /// Backfill the given races in oldest-first order
    pub async fn run_races(&self, races: &[RaceKey]) -> Result<BackfillReport, OrchestratorError> {
        let mut ordered = races.to_vec();
        ordered.sort();
        ordered.dedup();

        let mut report = BackfillReport::new();
        let requests_before = self.coordinator.requests_by_source();

        for (index, race) in ordered.iter().enumerate() {
            if index > 0 && !self.pacing.between_races.is_zero() {
                tokio::time::sleep(self.pacing.between_races).await;
            }

            for (position, category) in DataCategory::ALL.into_iter().enumerate() {
                if position > 0 && !self.pacing.between_categories.is_zero() {
                    tokio::time::sleep(self.pacing.between_categories).await;
                }
                self.process_category(*race, category, &mut report).await?;
            }
            report.races_processed += 1;
        }

        for (source, total) in self.coordinator.requests_by_source() {
            let used = total.saturating_sub(requests_before.get(&source).copied().unwrap_or(0));
            if used > 0 {
                report.api_requests.insert(source, used);
            }
        }
        report.finished_at = Some(Utc::now());

        for line in report.display_lines() {
            info!("{}", line);
        }
        Ok(report)
    }

    async fn process_category(
        &self,
        race: RaceKey,
        category: DataCategory,
        report: &mut BackfillReport,
    ) -> Result<(), OrchestratorError> {
        let stored = self.gateway.stored_count(category, race).await?;
        if stored > 0 {
            debug!(%race, %category, stored, "Already stored");
            report.record_already_present(race, category, stored);
            return Ok(());
        }

        debug!(%race, %category, "Acquiring");
        let acquisition = self.coordinator.acquire(category, race).await;
        let malformed = acquisition.malformed_count() as u64;
        let retry_later = acquisition.any_unavailable();

        match acquisition {
            Acquisition::Satisfied { source, batch, .. } => {
                debug!(%race, %category, %source, records = batch.len(), "Persisting");
                let tally = self.gateway.store_batch(&batch.records, source).await;

                // A batch where nothing landed may mean the store went away
                if tally.inserted == 0 && tally.skipped_duplicate == 0 && tally.errored > 0 {
                    self.gateway.has_category(category, race).await?;
                }

                info!(
                    %race,
                    %category,
                    %source,
                    inserted = tally.inserted,
                    skipped = tally.skipped_duplicate,
                    errored = tally.errored,
                    "Category satisfied"
                );
                report.record_satisfied(race, category, source, tally, malformed);
            }
            Acquisition::Unsatisfied { .. } => {
                warn!(%race, %category, retry_later, "Category unsatisfied: no source had data");
                report.record_unsatisfied(race, category, retry_later, malformed);
            }
        }

        Ok(())
    }

    async fn save_report(
        &self,
        range: SeasonRange,
        report: &BackfillReport,
    ) -> Result<(), OrchestratorError> {
        let run = db::runs::RunRecord {
            run_id: report.run_id.to_string(),
            started_at: report.started_at.to_rfc3339(),
            finished_at: report.finished_at.unwrap_or_else(Utc::now).to_rfc3339(),
            first_season: range.first,
            last_season: range.last,
            report: serde_json::to_value(report)
                .map_err(|e| gridcast_common::Error::Internal(format!("Serialize report: {}", e)))?,
        };
        db::runs::save_run(self.gateway.pool(), &run).await?;
        Ok(())
    }
}
