//! Application context and wiring

use crate::service::AnalyticsService;
use eventide_analytics::{
    AttributionEngine, CohortEngine, DataAggregator, FunnelEngine, PredictiveEngine,
};
use eventide_cache::{Cache, MemoryCache, RateLimiter};
use eventide_config::Config;
use eventide_core::Result;
use eventide_jobs::JobScheduler;
use eventide_processor::EventProcessor;
use eventide_store::AnalyticsStore;
use eventide_tracker::{EventTracker, TrackerConfig};
use std::sync::Arc;

/// Initialize the tracing subscriber from `RUST_LOG` (default `info`).
/// Call once, from the binary.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Root object owning every subsystem handle.
///
/// Built once at startup from the validated configuration and passed down
/// explicitly; dropping it (after `shutdown`) tears the pipeline down.
pub struct AppContext {
    pub config: Config,
    pub store: AnalyticsStore,
    pub cache: Arc<dyn Cache>,
    pub tracker: EventTracker,
    pub processor: Arc<EventProcessor>,
    pub scheduler: JobScheduler,
    pub service: AnalyticsService,
}

impl AppContext {
    /// Wire up the full pipeline. Background workers (tracker flusher, job
    /// scheduler) are started before this returns.
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate()?;

        let store = AnalyticsStore::connect(&config.database).await?;
        let cache: Arc<dyn Cache> = Arc::new(MemoryCache::new());

        let tracker = EventTracker::new(store.clone(), TrackerConfig::from(&config.analytics));
        tracker.start();

        let processor = Arc::new(EventProcessor::new(
            store.clone(),
            config.analytics.batch_size as u32,
        ));

        let scheduler = JobScheduler::new(store.clone(), &config.analytics);
        scheduler.start();

        let service = AnalyticsService::new(
            store.clone(),
            Arc::clone(&cache),
            tracker.clone(),
            RateLimiter::new(Arc::clone(&cache), config.api.rate_limit),
            DataAggregator::new(store.clone()),
            FunnelEngine::new(store.clone()),
            CohortEngine::new(store.clone()),
            AttributionEngine::new(store.clone()),
            PredictiveEngine::new(store.clone()),
            config.features.clone(),
        );

        tracing::info!(environment = ?config.environment, "Eventide context initialized");

        Ok(Self {
            config,
            store,
            cache,
            tracker,
            processor,
            scheduler,
            service,
        })
    }

    /// Stop background workers, draining the tracker queue.
    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        self.tracker.stop(true).await;
        tracing::info!("Eventide context shut down");
    }
}
