//! Fallback coordinator
//!
//! For one `(category, race)` pair, walks the category's source chain in
//! priority order and stops at the first source returning usable records.
//!
//! - Sources that do not support the category are skipped without a call
//! - A failing source is logged and the walk continues
//! - Exhausting the chain yields [`Acquisition::Unsatisfied`]; the caller
//!   records it and moves on

use crate::types::{DataCategory, RaceKey, SourceAdapter, SourceBatch, SourceId};
use gridcast_common::config::FallbackConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Per-category source priority order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FallbackChains {
    chains: HashMap<DataCategory, Vec<SourceId>>,
}

impl Default for FallbackChains {
    fn default() -> Self {
        Self::from(&FallbackConfig::default())
    }
}

impl From<&FallbackConfig> for FallbackChains {
    fn from(config: &FallbackConfig) -> Self {
        let mut chains = HashMap::new();
        chains.insert(DataCategory::Qualifying, config.qualifying.clone());
        chains.insert(DataCategory::PitStops, config.pit_stops.clone());
        chains.insert(DataCategory::LapTimes, config.lap_times.clone());
        Self { chains }
    }
}

impl FallbackChains {
    pub fn chain(&self, category: DataCategory) -> &[SourceId] {
        self.chains.get(&category).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn with_chain(mut self, category: DataCategory, sources: Vec<SourceId>) -> Self {
        self.chains.insert(category, sources);
        self
    }
}

/// What happened when one source was consulted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    /// Source cannot provide this category; not invoked
    Unsupported,
    /// Source answered with no usable records
    Empty { malformed: usize },
    /// Source failed; `transient` means retrying later may succeed
    Failed { reason: String, transient: bool },
    /// Source returned records
    Data { records: usize, malformed: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceAttempt {
    pub source: SourceId,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// Result of walking one chain
#[derive(Debug, Clone, PartialEq)]
pub enum Acquisition {
    Satisfied {
        source: SourceId,
        batch: SourceBatch,
        attempts: Vec<SourceAttempt>,
    },
    Unsatisfied {
        attempts: Vec<SourceAttempt>,
    },
}

impl Acquisition {
    pub fn attempts(&self) -> &[SourceAttempt] {
        match self {
            Acquisition::Satisfied { attempts, .. } => attempts,
            Acquisition::Unsatisfied { attempts } => attempts,
        }
    }

    pub fn source(&self) -> Option<SourceId> {
        match self {
            Acquisition::Satisfied { source, .. } => Some(*source),
            Acquisition::Unsatisfied { .. } => None,
        }
    }

    /// True when any source failed transiently (retry later)
    pub fn any_unavailable(&self) -> bool {
        self.attempts()
            .iter()
            .any(|a| matches!(a.outcome, AttemptOutcome::Failed { transient: true, .. }))
    }

    /// Malformed records seen across every consulted source
    pub fn malformed_count(&self) -> usize {
        self.attempts()
            .iter()
            .map(|a| match a.outcome {
                AttemptOutcome::Empty { malformed } => malformed,
                AttemptOutcome::Data { malformed, .. } => malformed,
                _ => 0,
            })
            .sum()
    }
}

/// Walks fallback chains over a fixed set of adapters
pub struct FallbackCoordinator {
    adapters: HashMap<SourceId, Arc<dyn SourceAdapter>>,
    chains: FallbackChains,
}

impl FallbackCoordinator {
    pub fn new(adapters: Vec<Arc<dyn SourceAdapter>>, chains: FallbackChains) -> Self {
        let adapters = adapters.into_iter().map(|a| (a.id(), a)).collect();
        Self { adapters, chains }
    }

    pub fn chains(&self) -> &FallbackChains {
        &self.chains
    }

    /// Upstream request counts per registered source
    pub fn requests_by_source(&self) -> HashMap<SourceId, u64> {
        self.adapters
            .iter()
            .map(|(id, adapter)| (*id, adapter.requests_made()))
            .collect()
    }

    pub async fn acquire(&self, category: DataCategory, race: RaceKey) -> Acquisition {
        let mut attempts = Vec::new();

        for &source in self.chains.chain(category) {
            let adapter = match self.adapters.get(&source) {
                Some(adapter) if adapter.supports(category) => adapter,
                _ => {
                    debug!(%race, %category, %source, "Source does not provide category, skipping");
                    attempts.push(SourceAttempt {
                        source,
                        outcome: AttemptOutcome::Unsupported,
                    });
                    continue;
                }
            };

            match adapter.fetch(category, race).await {
                Ok(batch) if batch.is_empty() => {
                    debug!(
                        %race,
                        %category,
                        %source,
                        malformed = batch.malformed.len(),
                        "Source returned no data"
                    );
                    attempts.push(SourceAttempt {
                        source,
                        outcome: AttemptOutcome::Empty {
                            malformed: batch.malformed.len(),
                        },
                    });
                }
                Ok(batch) => {
                    info!(%race, %category, %source, records = batch.len(), "Category acquired");
                    attempts.push(SourceAttempt {
                        source,
                        outcome: AttemptOutcome::Data {
                            records: batch.len(),
                            malformed: batch.malformed.len(),
                        },
                    });
                    return Acquisition::Satisfied {
                        source,
                        batch,
                        attempts,
                    };
                }
                Err(e) => {
                    warn!(
                        %race,
                        %category,
                        %source,
                        error = %e,
                        "Source failed, trying next in chain"
                    );
                    attempts.push(SourceAttempt {
                        source,
                        outcome: AttemptOutcome::Failed {
                            reason: e.to_string(),
                            transient: e.is_transient(),
                        },
                    });
                }
            }
        }

        Acquisition::Unsatisfied { attempts }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SourceError;
    use crate::types::{NormalizedRecord, QualifyingRecord};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    enum Behavior {
        Empty,
        Rows(usize),
        Down,
    }

    struct StubSource {
        id: SourceId,
        categories: Vec<DataCategory>,
        behavior: Behavior,
        calls: AtomicUsize,
    }

    impl StubSource {
        fn new(id: SourceId, categories: Vec<DataCategory>, behavior: Behavior) -> Arc<Self> {
            Arc::new(Self {
                id,
                categories,
                behavior,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl SourceAdapter for StubSource {
        fn id(&self) -> SourceId {
            self.id
        }

        fn supports(&self, category: DataCategory) -> bool {
            self.categories.contains(&category)
        }

        async fn fetch(
            &self,
            _category: DataCategory,
            race: RaceKey,
        ) -> Result<SourceBatch, SourceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.behavior {
                Behavior::Empty => Ok(SourceBatch::empty()),
                Behavior::Down => Err(SourceError::Unavailable {
                    attempts: 5,
                    reason: "HTTP 503".to_string(),
                }),
                Behavior::Rows(n) => Ok(SourceBatch::new(
                    (1..=n)
                        .map(|i| {
                            NormalizedRecord::Qualifying(QualifyingRecord {
                                race,
                                driver_id: format!("driver_{}", i),
                                position: i as i32,
                                q1: None,
                                q2: None,
                                q3: None,
                            })
                        })
                        .collect(),
                    vec![],
                )),
            }
        }
    }

    const ALL: [DataCategory; 3] = DataCategory::ALL;

    #[tokio::test]
    async fn test_first_non_empty_source_wins() {
        let a = StubSource::new(SourceId::ResultsApi, ALL.to_vec(), Behavior::Empty);
        let b = StubSource::new(SourceId::TelemetryApi, ALL.to_vec(), Behavior::Rows(3));
        let c = StubSource::new(SourceId::SessionTiming, ALL.to_vec(), Behavior::Rows(5));

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![a.clone(), b.clone(), c.clone()];
        let coordinator = FallbackCoordinator::new(adapters, FallbackChains::default());
        let acquisition = coordinator.acquire(DataCategory::LapTimes, RaceKey::new(2023, 5)).await;

        assert_eq!(acquisition.source(), Some(SourceId::TelemetryApi));
        assert_eq!(c.calls.load(Ordering::SeqCst), 0, "lower-priority source must not be called");
    }

    #[tokio::test]
    async fn test_unsupported_source_is_not_invoked() {
        let a = StubSource::new(SourceId::ResultsApi, ALL.to_vec(), Behavior::Empty);
        let b = StubSource::new(
            SourceId::TelemetryApi,
            vec![DataCategory::PitStops, DataCategory::LapTimes],
            Behavior::Rows(20),
        );
        let c = StubSource::new(SourceId::SessionTiming, ALL.to_vec(), Behavior::Rows(20));

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![a.clone(), b.clone(), c.clone()];
        let coordinator = FallbackCoordinator::new(adapters, FallbackChains::default());
        let acquisition = coordinator
            .acquire(DataCategory::Qualifying, RaceKey::new(2023, 5))
            .await;

        assert_eq!(acquisition.source(), Some(SourceId::SessionTiming));
        assert_eq!(b.calls.load(Ordering::SeqCst), 0);
        assert_eq!(acquisition.attempts()[1].outcome, AttemptOutcome::Unsupported);
    }

    #[tokio::test]
    async fn test_failed_source_falls_through() {
        let a = StubSource::new(SourceId::ResultsApi, ALL.to_vec(), Behavior::Down);
        let b = StubSource::new(SourceId::SessionTiming, ALL.to_vec(), Behavior::Rows(2));

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![a, b];
        let coordinator = FallbackCoordinator::new(adapters, FallbackChains::default());
        let acquisition = coordinator.acquire(DataCategory::PitStops, RaceKey::new(2019, 3)).await;

        assert_eq!(acquisition.source(), Some(SourceId::SessionTiming));
        assert!(acquisition.any_unavailable());
    }

    #[tokio::test]
    async fn test_all_exhausted_is_unsatisfied() {
        let a = StubSource::new(SourceId::ResultsApi, ALL.to_vec(), Behavior::Empty);
        let b = StubSource::new(SourceId::SessionTiming, ALL.to_vec(), Behavior::Empty);

        let adapters: Vec<Arc<dyn SourceAdapter>> = vec![a, b];
        let coordinator = FallbackCoordinator::new(adapters, FallbackChains::default());
        let acquisition = coordinator.acquire(DataCategory::PitStops, RaceKey::new(2012, 1)).await;

        assert!(matches!(acquisition, Acquisition::Unsatisfied { .. }));
        assert!(!acquisition.any_unavailable());
        // Telemetry is in the chain but not registered
        assert_eq!(acquisition.attempts().len(), 3);
    }

    #[test]
    fn test_chain_override() {
        let chains = FallbackChains::default()
            .with_chain(DataCategory::LapTimes, vec![SourceId::SessionTiming]);
        assert_eq!(chains.chain(DataCategory::LapTimes), &[SourceId::SessionTiming]);
        assert_eq!(chains.chain(DataCategory::Qualifying).len(), 3);
    }
}
