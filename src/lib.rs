pub mod config;
pub mod coordinator;
pub mod db;
pub mod engine;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod store;

use std::sync::Arc;

use coordinator::{CoordinatorSettings, ScanCoordinator};
use engine::{builtin, IdentityMatcher, NormalizedMarkupMatcher, RuleCatalog};
use errors::AppError;
use services::aggregation::{Aggregator, StatsCache};
use services::lifecycle::Lifecycle;
use store::{ContentRepository, FindingStore};

/// Shared application state passed to all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub store: Arc<dyn FindingStore>,
    pub content: Arc<dyn ContentRepository>,
    pub catalog: Arc<RuleCatalog>,
    pub matcher: Arc<dyn IdentityMatcher>,
    pub stats: Arc<StatsCache>,
    pub lifecycle: Arc<Lifecycle>,
    pub aggregator: Arc<Aggregator>,
    pub coordinator: Arc<ScanCoordinator>,
}

impl AppState {
    /// Wire services over the given stores with the built-in check registry.
    pub fn new(
        config: config::AppConfig,
        store: Arc<dyn FindingStore>,
        content: Arc<dyn ContentRepository>,
        catalog: Arc<RuleCatalog>,
    ) -> Result<Self, AppError> {
        let checks = builtin::checks()
            .map_err(|e| AppError::Internal(format!("Invalid built-in check pattern: {e}")))?;
        let matcher: Arc<dyn IdentityMatcher> = Arc::new(
            NormalizedMarkupMatcher::new()
                .map_err(|e| AppError::Internal(format!("Invalid matcher pattern: {e}")))?,
        );
        let stats = Arc::new(StatsCache::new());

        let lifecycle = Arc::new(Lifecycle::new(
            Arc::clone(&store),
            Arc::clone(&matcher),
            Arc::clone(&stats),
            config.store_timeout,
        ));
        let aggregator = Arc::new(Aggregator::new(
            Arc::clone(&store),
            Arc::clone(&content),
            Arc::clone(&catalog),
            config.excluded_rules.clone(),
            Arc::clone(&stats),
            config.store_timeout,
        ));
        let coordinator = Arc::new(ScanCoordinator::new(
            Arc::clone(&lifecycle),
            Arc::clone(&content),
            Arc::clone(&catalog),
            Arc::new(checks),
            CoordinatorSettings::from_config(&config),
        ));

        Ok(Self {
            config,
            store,
            content,
            catalog,
            matcher,
            stats,
            lifecycle,
            aggregator,
            coordinator,
        })
    }
}
