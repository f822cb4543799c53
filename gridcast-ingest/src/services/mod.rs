//! Pipeline services

pub mod backfill_orchestrator;
pub mod fallback_coordinator;
pub mod feature_alignment;
pub mod persistence_gateway;
pub mod race_catalog;
pub mod scoring;

pub use backfill_orchestrator::{BackfillOrchestrator, BackfillReport, Pacing};
pub use fallback_coordinator::{Acquisition, FallbackChains, FallbackCoordinator};
pub use feature_alignment::FeatureAligner;
pub use persistence_gateway::{PersistenceGateway, StoreOutcome, StoreTally};
pub use race_catalog::RaceCatalog;
pub use scoring::{predict_race, LinearScorer, RaceContext, Scorer};
