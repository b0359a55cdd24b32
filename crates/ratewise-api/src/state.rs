//! Application state shared across all route handlers.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ratewise_core::config::RatewiseConfig;
use ratewise_core::LocationNormalizer;
use ratewise_engine::{BackoffPolicy, DispatchPolicy, HybridResolver, IngestionCoordinator, RetryWorker};
use ratewise_storage::{Database, RateSheetRepository, RateStore, RetryQueue, SqliteRateStore};
use ratewise_vector::{DynEmbeddingService, SemanticIndex};

/// Shared application state. Cheap to clone; every service sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<RatewiseConfig>,
    pub store: Arc<dyn RateStore>,
    pub index: Arc<dyn SemanticIndex>,
    pub retry_queue: Arc<RetryQueue>,
    pub coordinator: Arc<IngestionCoordinator>,
    pub resolver: Arc<HybridResolver>,
    pub policy: Arc<DispatchPolicy>,
    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Wire the services over one database and one semantic index.
    pub fn new(
        config: RatewiseConfig,
        database: Arc<Database>,
        index: Arc<dyn SemanticIndex>,
        embedder: Arc<dyn DynEmbeddingService>,
    ) -> Self {
        let normalizer = Arc::new(LocationNormalizer::from_config(&config.locations));
        let store: Arc<dyn RateStore> = Arc::new(SqliteRateStore::new(
            Arc::new(RateSheetRepository::new(Arc::clone(&database))),
            Arc::clone(&normalizer),
        ));
        let retry_queue = Arc::new(RetryQueue::new(database));

        let coordinator = IngestionCoordinator::new(
            Arc::clone(&index),
            Arc::clone(&embedder),
            Arc::clone(&store),
            Arc::clone(&retry_queue),
            normalizer,
            BackoffPolicy::from_config(&config.ingestion),
        )
        .with_write_timeout(Duration::from_millis(
            config.ingestion.structured_write_timeout_ms,
        ));
        let resolver = HybridResolver::new(
            Arc::clone(&store),
            Arc::clone(&index),
            embedder,
            &config.resolver,
            &config.scoring,
        );

        Self {
            policy: Arc::new(DispatchPolicy::new(config.dispatch.clone())),
            config: Arc::new(config),
            store,
            index,
            retry_queue,
            coordinator: Arc::new(coordinator),
            resolver: Arc::new(resolver),
            start_time: Instant::now(),
        }
    }

    /// Retry worker draining this state's queue into this state's store.
    pub fn retry_worker(&self) -> RetryWorker {
        RetryWorker::new(
            Arc::clone(&self.retry_queue),
            Arc::clone(&self.store),
            &self.config.ingestion,
        )
    }
}
