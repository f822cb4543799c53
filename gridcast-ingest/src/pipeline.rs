//! Pipeline wiring
//!
//! Builds the three source adapters, the fallback chains and the services
//! from one loaded [`TomlConfig`].

use crate::error::SourceError;
use crate::services::{
    BackfillOrchestrator, FallbackChains, FallbackCoordinator, FeatureAligner, Pacing,
    PersistenceGateway, RaceCatalog,
};
use crate::sources::{ResultsApiAdapter, SessionTimingAdapter, TelemetryApiAdapter};
use crate::types::SourceAdapter;
use crate::utils::ResilientClient;
use gridcast_common::config::TomlConfig;
use sqlx::SqlitePool;
use std::sync::Arc;
use tracing::info;

/// Fully wired services over one canonical store
pub struct Pipeline {
    pub orchestrator: BackfillOrchestrator,
    pub catalog: RaceCatalog,
    pub aligner: FeatureAligner,
    pub gateway: PersistenceGateway,
}

impl Pipeline {
    pub fn from_config(pool: SqlitePool, config: &TomlConfig) -> Result<Self, SourceError> {
        let sources = &config.sources;
        let client = || ResilientClient::from_config(sources, &config.retry);

        let results_api = Arc::new(ResultsApiAdapter::new(client()?, &sources.results_api_url));
        let telemetry_api = Arc::new(TelemetryApiAdapter::new(
            client()?,
            &sources.telemetry_api_url,
            pool.clone(),
            config
                .driver_number_map()
                .map_err(|e| SourceError::Setup(e.to_string()))?,
            sources.telemetry_first_season,
        ));
        let session_timing = Arc::new(SessionTimingAdapter::new(
            client()?,
            &sources.session_timing_url,
            pool.clone(),
            sources.session_timing_first_season,
        ));

        info!(
            results_api = %sources.results_api_url,
            telemetry_api = %sources.telemetry_api_url,
            session_timing = %sources.session_timing_url,
            "Source adapters configured"
        );

        let adapters: Vec<Arc<dyn SourceAdapter>> =
            vec![results_api.clone(), telemetry_api, session_timing];
        Ok(Self::assemble(
            pool,
            adapters,
            Some(results_api),
            FallbackChains::from(&config.fallback),
            Pacing::from(&config.backfill),
            config.backfill.lock_wait_ms,
        ))
    }

    /// Wire services around an explicit adapter set
    pub fn assemble(
        pool: SqlitePool,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        schedule: Option<Arc<ResultsApiAdapter>>,
        chains: FallbackChains,
        pacing: Pacing,
        lock_wait_ms: u64,
    ) -> Self {
        let gateway = PersistenceGateway::new(pool.clone(), lock_wait_ms);
        let coordinator = FallbackCoordinator::new(adapters, chains);
        let orchestrator = BackfillOrchestrator::new(
            coordinator,
            gateway.clone(),
            RaceCatalog::new(gateway.clone(), schedule.clone()),
            pacing,
        );

        Self {
            orchestrator,
            catalog: RaceCatalog::new(gateway.clone(), schedule),
            aligner: FeatureAligner::new(pool),
            gateway,
        }
    }
}
