//! Backfill run statistics
//!
//! One [`BackfillReport`] per run, returned by value. Partial reports
//! (e.g. one per season) combine with [`BackfillReport::merge`].

use crate::services::persistence_gateway::StoreTally;
use crate::types::{DataCategory, RaceKey, SourceId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Counts for one data category
///
/// Display: "N added, M duplicate, E errors, P already present, U unsatisfied
/// (R retry later)"
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryStats {
    /// Records inserted
    pub added: u64,
    /// Records skipped because their natural key was already stored
    pub skipped_duplicate: u64,
    /// Records that failed mapping or storage
    pub errored: u64,
    /// Races whose category was already stored before acquisition
    pub already_present: u64,
    /// Races for which no source had data
    pub unsatisfied: u64,
    /// Unsatisfied races where at least one source failed transiently
    pub unavailable: u64,
}

impl CategoryStats {
    pub fn display_string(&self) -> String {
        format!(
            "{} added, {} duplicate, {} errors, {} already present, \
             {} unsatisfied ({} retry later)",
            self.added,
            self.skipped_duplicate,
            self.errored,
            self.already_present,
            self.unsatisfied,
            self.unavailable
        )
    }

    fn merge(&mut self, other: &CategoryStats) {
        self.added += other.added;
        self.skipped_duplicate += other.skipped_duplicate;
        self.errored += other.errored;
        self.already_present += other.already_present;
        self.unsatisfied += other.unsatisfied;
        self.unavailable += other.unavailable;
    }
}

/// Counts for one satisfying source within one category
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceStats {
    /// Races this source satisfied
    pub races_satisfied: u64,
    /// Records added from this source
    pub added: u64,
    pub skipped_duplicate: u64,
    pub errored: u64,
}

/// Terminal state of one race/category pair
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CategoryOutcome {
    /// Data was stored before this run touched it; every stored record
    /// counts as a skipped duplicate
    AlreadyPresent { stored: u64 },
    /// Acquired from `source` and persisted
    Satisfied { source: SourceId, tally: StoreTally },
    /// No source had data
    Unsatisfied { retry_later: bool },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceOutcome {
    pub race: RaceKey,
    pub category: DataCategory,
    #[serde(flatten)]
    pub outcome: CategoryOutcome,
}

/// Result of one backfill run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackfillReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub races_processed: u64,
    pub categories: BTreeMap<DataCategory, CategoryStats>,
    pub sources: BTreeMap<DataCategory, BTreeMap<SourceId, SourceStats>>,
    /// Upstream requests issued per source, retries included
    pub api_requests: BTreeMap<SourceId, u64>,
    pub outcomes: Vec<RaceOutcome>,
}

impl Default for BackfillReport {
    fn default() -> Self {
        Self::new()
    }
}

impl BackfillReport {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            races_processed: 0,
            categories: BTreeMap::new(),
            sources: BTreeMap::new(),
            api_requests: BTreeMap::new(),
            outcomes: Vec::new(),
        }
    }

    pub fn category(&self, category: DataCategory) -> CategoryStats {
        self.categories.get(&category).cloned().unwrap_or_default()
    }

    pub fn source(&self, category: DataCategory, source: SourceId) -> SourceStats {
        self.sources
            .get(&category)
            .and_then(|by_source| by_source.get(&source))
            .cloned()
            .unwrap_or_default()
    }

    pub fn outcome(&self, race: RaceKey, category: DataCategory) -> Option<&CategoryOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.race == race && o.category == category)
            .map(|o| &o.outcome)
    }

    pub fn total_added(&self) -> u64 {
        self.categories.values().map(|c| c.added).sum()
    }

    pub fn record_already_present(&mut self, race: RaceKey, category: DataCategory, stored: u64) {
        let stats = self.categories.entry(category).or_default();
        stats.already_present += 1;
        stats.skipped_duplicate += stored;
        self.outcomes.push(RaceOutcome {
            race,
            category,
            outcome: CategoryOutcome::AlreadyPresent { stored },
        });
    }

    pub fn record_satisfied(
        &mut self,
        race: RaceKey,
        category: DataCategory,
        source: SourceId,
        tally: StoreTally,
        malformed: u64,
    ) {
        let stats = self.categories.entry(category).or_default();
        stats.added += tally.inserted;
        stats.skipped_duplicate += tally.skipped_duplicate;
        stats.errored += tally.errored + malformed;

        let by_source = self
            .sources
            .entry(category)
            .or_default()
            .entry(source)
            .or_default();
        by_source.races_satisfied += 1;
        by_source.added += tally.inserted;
        by_source.skipped_duplicate += tally.skipped_duplicate;
        by_source.errored += tally.errored;

        self.outcomes.push(RaceOutcome {
            race,
            category,
            outcome: CategoryOutcome::Satisfied { source, tally },
        });
    }

    pub fn record_unsatisfied(
        &mut self,
        race: RaceKey,
        category: DataCategory,
        retry_later: bool,
        malformed: u64,
    ) {
        let stats = self.categories.entry(category).or_default();
        stats.unsatisfied += 1;
        stats.errored += malformed;
        if retry_later {
            stats.unavailable += 1;
        }
        self.outcomes.push(RaceOutcome {
            race,
            category,
            outcome: CategoryOutcome::Unsatisfied { retry_later },
        });
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: &BackfillReport) {
        self.started_at = self.started_at.min(other.started_at);
        self.finished_at = match (self.finished_at, other.finished_at) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
        self.races_processed += other.races_processed;

        for (category, stats) in &other.categories {
            self.categories.entry(*category).or_default().merge(stats);
        }
        for (category, by_source) in &other.sources {
            let mine = self.sources.entry(*category).or_default();
            for (source, stats) in by_source {
                let entry = mine.entry(*source).or_default();
                entry.races_satisfied += stats.races_satisfied;
                entry.added += stats.added;
                entry.skipped_duplicate += stats.skipped_duplicate;
                entry.errored += stats.errored;
            }
        }
        for (source, count) in &other.api_requests {
            *self.api_requests.entry(*source).or_default() += count;
        }
        self.outcomes.extend(other.outcomes.iter().cloned());
    }

    /// End-of-run summary lines
    pub fn display_lines(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "Backfill run {}: {} races processed, {} records added",
            self.run_id,
            self.races_processed,
            self.total_added()
        )];

        for category in DataCategory::ALL {
            lines.push(format!("  {}: {}", category, self.category(category).display_string()));
            if let Some(by_source) = self.sources.get(&category) {
                for (source, stats) in by_source {
                    lines.push(format!(
                        "    via {}: {} races, {} added",
                        source, stats.races_satisfied, stats.added
                    ));
                }
            }
        }

        if !self.api_requests.is_empty() {
            let usage: Vec<String> = self
                .api_requests
                .iter()
                .map(|(source, count)| format!("{} {}", source, count))
                .collect();
            lines.push(format!("  API requests: {}", usage.join(", ")));
        }

        let retry: Vec<String> = self
            .outcomes
            .iter()
            .filter(|o| matches!(o.outcome, CategoryOutcome::Unsatisfied { retry_later: true }))
            .map(|o| format!("{} {}", o.race, o.category))
            .collect();
        if !retry.is_empty() {
            lines.push(format!("  Retry later: {}", retry.join(", ")));
        }

        lines
    }
}
