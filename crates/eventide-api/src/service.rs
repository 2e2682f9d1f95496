//! Typed analytics operations
//!
//! Each operation validates its input, talks to the owning subsystem, and
//! returns a typed result. `status_code` maps the error taxonomy onto HTTP
//! statuses for the router.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use eventide_analytics::{
    AttributionEngine, CohortEngine, DataAggregator, FunnelEngine, PredictiveEngine,
    SessionMetrics,
};
use eventide_cache::{Cache, RateLimiter};
use eventide_config::FeatureFlags;
use eventide_core::ab_test::AbTestAssignment;
use eventide_core::cohort::CohortAnalysis;
use eventide_core::event::{EventCreate, EventQuery};
use eventide_core::funnel::FunnelAnalysis;
use eventide_core::metric::{Metric, MetricCreate, MetricQuery};
use eventide_core::types::{CACHE_TTL_SHORT, MAX_BATCH_SIZE};
use eventide_core::{
    generate_id, AggregationPeriod, AttributionModel, Error, Event, Result, Session,
};
use eventide_store::{AbTestRepo, AnalyticsStore, EventRepo, MetricRepo, SessionRepo};
use eventide_tracker::EventTracker;
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Map an error to the HTTP status the router should answer with.
pub fn status_code(error: &Error) -> u16 {
    match error {
        Error::Validation(_) | Error::ConfigValidation(_) => 422,
        Error::NotFound(_) => 404,
        Error::Conflict(_) => 409,
        Error::RateLimitExceeded { .. } => 429,
        Error::Timeout(_) => 504,
        _ => 500,
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchResult {
    pub created: usize,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct EventsPage {
    pub events: Vec<Event>,
    pub total: u64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsPage {
    pub metrics: Vec<Metric>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct HealthStatus {
    pub status: &'static str,
    pub service: &'static str,
    pub store_ok: bool,
    pub cache_ok: bool,
}

pub struct AnalyticsService {
    store: AnalyticsStore,
    cache: Arc<dyn Cache>,
    tracker: EventTracker,
    rate_limiter: RateLimiter,
    aggregator: DataAggregator,
    funnels: FunnelEngine,
    cohorts: CohortEngine,
    attribution: AttributionEngine,
    predictive: PredictiveEngine,
    features: FeatureFlags,
}

impl AnalyticsService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: AnalyticsStore,
        cache: Arc<dyn Cache>,
        tracker: EventTracker,
        rate_limiter: RateLimiter,
        aggregator: DataAggregator,
        funnels: FunnelEngine,
        cohorts: CohortEngine,
        attribution: AttributionEngine,
        predictive: PredictiveEngine,
        features: FeatureFlags,
    ) -> Self {
        Self {
            store,
            cache,
            tracker,
            rate_limiter,
            aggregator,
            funnels,
            cohorts,
            attribution,
            predictive,
            features,
        }
    }

    /// Accept one event for ingestion. 201 on success.
    pub async fn create_event(&self, client_id: &str, create: EventCreate) -> Result<Event> {
        self.rate_limiter.check(client_id).await?;
        create.validate()?;

        self.tracker
            .track_event(create)
            .ok_or_else(|| Error::Internal("Ingestion queue is full".to_string()))
    }

    /// Accept a batch of events; all or none.
    pub async fn batch_events(
        &self,
        client_id: &str,
        batch: Vec<EventCreate>,
    ) -> Result<BatchResult> {
        self.rate_limiter.check(client_id).await?;

        if batch.is_empty() {
            return Err(Error::Validation("Batch cannot be empty".to_string()));
        }
        if batch.len() > MAX_BATCH_SIZE {
            return Err(Error::Validation(format!(
                "Batch exceeds {} events",
                MAX_BATCH_SIZE
            )));
        }
        for create in &batch {
            create.validate()?;
        }

        let count = batch.len();
        self.tracker
            .track_batch(batch)
            .ok_or_else(|| Error::Internal("Ingestion queue is full".to_string()))?;

        Ok(BatchResult { created: count })
    }

    /// Query persisted events with pagination.
    pub async fn query_events(&self, query: EventQuery) -> Result<EventsPage> {
        if let (Some(start), Some(end)) = (query.start, query.end)
            && start > end
        {
            return Err(Error::Validation(
                "Query start must not be after end".to_string(),
            ));
        }

        let mut sess = self.store.session().await?;
        let events = EventRepo.get_by_filters(&mut sess, &query).await?;
        let total = EventRepo.count(&mut sess, &query).await?;
        Ok(EventsPage { events, total })
    }

    /// Persist one metric value directly.
    pub async fn create_metric(&self, create: MetricCreate) -> Result<Metric> {
        if create.name.is_empty() {
            return Err(Error::Validation("Metric name cannot be empty".to_string()));
        }

        let metric = create.into_metric();
        let mut sess = self.store.session().await?;
        MetricRepo.create(&mut sess, &metric).await?;
        sess.commit().await?;
        Ok(metric)
    }

    pub async fn query_metrics(&self, query: MetricQuery) -> Result<MetricsPage> {
        let mut sess = self.store.session().await?;
        let metrics = MetricRepo.get_by_filters(&mut sess, &query).await?;
        Ok(MetricsPage { metrics })
    }

    /// Funnel analysis; 404 when the funnel does not resolve.
    pub async fn analyze_funnel(
        &self,
        funnel_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        deadline: Option<Duration>,
    ) -> Result<FunnelAnalysis> {
        self.funnels
            .analyze_funnel(funnel_id, start, end, deadline)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Funnel not found: {}", funnel_id)))
    }

    /// Cohort retention analysis; 404 for an empty cohort.
    pub async fn analyze_cohort(
        &self,
        cohort_date: DateTime<Utc>,
        periods: u32,
        period_type: AggregationPeriod,
        deadline: Option<Duration>,
    ) -> Result<CohortAnalysis> {
        if periods == 0 || periods > 52 {
            return Err(Error::Validation(format!(
                "Periods must be in 1..=52, got {}",
                periods
            )));
        }

        self.cohorts
            .analyze_retention_cohort(cohort_date, periods, period_type, deadline)
            .await?
            .ok_or_else(|| {
                Error::NotFound(format!(
                    "No users acquired around {}",
                    cohort_date.date_naive()
                ))
            })
    }

    /// Attribution credits for one conversion.
    pub async fn calculate_attribution(
        &self,
        conversion_id: &str,
        model: AttributionModel,
        deadline: Option<Duration>,
    ) -> Result<HashMap<String, f64>> {
        self.attribution
            .calculate_attribution(conversion_id, model, deadline)
            .await
    }

    /// Open a session explicitly for a user. Sessions are never created as
    /// a side effect of event ingestion.
    pub async fn start_session(
        &self,
        user_id: &str,
        utm_source: Option<String>,
        utm_medium: Option<String>,
        utm_campaign: Option<String>,
        referrer: Option<String>,
        landing_page: Option<String>,
    ) -> Result<Session> {
        if user_id.is_empty() {
            return Err(Error::Validation("User id cannot be empty".to_string()));
        }

        let session = Session::open(user_id, Utc::now()).with_attribution(
            utm_source,
            utm_medium,
            utm_campaign,
            referrer,
            landing_page,
        );

        let mut sess = self.store.session().await?;
        SessionRepo.create(&mut sess, &session).await?;
        sess.commit().await?;

        tracing::debug!(session_id = %session.id, user_id = user_id, "Session opened");
        Ok(session)
    }

    /// Explicitly close a session.
    pub async fn end_session(&self, session_id: &str) -> Result<Session> {
        let mut sess = self.store.session().await?;
        let Some(mut session) = SessionRepo.get_by_id(&mut sess, session_id).await? else {
            return Err(Error::NotFound(format!("Session not found: {}", session_id)));
        };

        session.close();
        SessionRepo.update(&mut sess, &session).await?;
        sess.commit().await?;
        Ok(session)
    }

    /// Session metrics with a short-lived cache in front (dashboard reads).
    pub async fn session_metrics_snapshot(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<SessionMetrics> {
        let cache_key = format!(
            "session_metrics:{}:{}",
            start.timestamp(),
            end.timestamp()
        );

        if let Ok(Some(bytes)) = self.cache.get(&cache_key).await
            && let Ok(cached) = serde_json::from_slice::<CachedSessionMetrics>(&bytes)
        {
            return Ok(cached.into());
        }

        let metrics = self
            .aggregator
            .calculate_session_metrics(start, end, None)
            .await?;

        if let Ok(bytes) = serde_json::to_vec(&CachedSessionMetrics::from(&metrics)) {
            let _ = self
                .cache
                .set(&cache_key, bytes, Some(Duration::from_secs(CACHE_TTL_SHORT)))
                .await;
        }

        Ok(metrics)
    }

    /// Sticky variant assignment for an A/B test.
    ///
    /// Returns the existing assignment when present; otherwise draws one
    /// from the test's traffic split and records it. A racing insert is
    /// resolved by re-reading.
    pub async fn assign_variant(&self, test_id: &str, user_id: &str) -> Result<AbTestAssignment> {
        if !self.features.ab_testing {
            return Err(Error::Validation("A/B testing is not enabled".to_string()));
        }

        let mut sess = self.store.session().await?;

        if let Some(existing) = AbTestRepo.get_assignment(&mut sess, test_id, user_id).await? {
            return Ok(existing);
        }

        let Some(test) = AbTestRepo.get_by_id(&mut sess, test_id).await? else {
            return Err(Error::NotFound(format!("Test not found: {}", test_id)));
        };
        if !test.is_active(Utc::now()) {
            return Err(Error::Validation(format!(
                "Test '{}' is not accepting assignments",
                test.name
            )));
        }

        let draw: f64 = rand::rng().random();
        let variant = test
            .variant_for_draw(draw)
            .ok_or_else(|| Error::Internal("Test has no variants".to_string()))?
            .to_string();

        let assignment = AbTestAssignment {
            id: generate_id(),
            test_id: test_id.to_string(),
            user_id: user_id.to_string(),
            variant,
            assigned_at: Utc::now(),
        };

        match AbTestRepo.create_assignment(&mut sess, &assignment).await {
            Ok(()) => {
                AbTestRepo.increment_participants(&mut sess, test_id).await?;
                sess.commit().await?;
                Ok(assignment)
            }
            Err(Error::Conflict(_)) => {
                // Another writer won the (test, user) slot
                drop(sess);
                let mut sess = self.store.session().await?;
                AbTestRepo
                    .get_assignment(&mut sess, test_id, user_id)
                    .await?
                    .ok_or_else(|| Error::Internal("Assignment vanished after conflict".to_string()))
            }
            Err(e) => Err(e),
        }
    }

    /// Churn probability, gated on the predictive feature flag.
    pub async fn predict_churn(&self, user_id: &str, deadline: Option<Duration>) -> Result<f64> {
        self.require_predictive()?;
        self.predictive.predict_churn(user_id, deadline).await
    }

    pub async fn predict_ltv(
        &self,
        user_id: &str,
        months: u32,
        deadline: Option<Duration>,
    ) -> Result<f64> {
        self.require_predictive()?;
        self.predictive.predict_ltv(user_id, months, deadline).await
    }

    pub async fn engagement_score(
        &self,
        user_id: &str,
        deadline: Option<Duration>,
    ) -> Result<f64> {
        self.require_predictive()?;
        self.predictive.engagement_score(user_id, deadline).await
    }

    fn require_predictive(&self) -> Result<()> {
        if self.features.predictive {
            Ok(())
        } else {
            Err(Error::Validation(
                "Predictive analytics is not enabled".to_string(),
            ))
        }
    }

    /// Liveness of the service and its backing store/cache.
    pub async fn health_check(&self) -> HealthStatus {
        let store_ok = self.store.health_check().await.is_ok();

        let probe_key = "health_probe";
        let cache_ok = self
            .cache
            .set(
                probe_key,
                b"ok".to_vec(),
                Some(Duration::from_secs(CACHE_TTL_SHORT)),
            )
            .await
            .is_ok()
            && matches!(self.cache.get(probe_key).await, Ok(Some(_)));

        HealthStatus {
            status: if store_ok && cache_ok { "healthy" } else { "degraded" },
            service: "eventide-analytics",
            store_ok,
            cache_ok,
        }
    }

    /// Dimension rollup passthrough for dashboard widgets.
    pub async fn aggregate_by_dimension(
        &self,
        dimension: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<eventide_analytics::DimensionBucket>> {
        self.aggregator
            .aggregate_by_dimension(dimension, start, end, None, None)
            .await
    }

    /// Hourly aggregation window helper for the router's reports endpoint.
    pub async fn aggregate_last_hours(
        &self,
        hours: i64,
        period: AggregationPeriod,
    ) -> Result<Vec<eventide_analytics::EventBucket>> {
        let end = Utc::now();
        let start = end - ChronoDuration::hours(hours);
        self.aggregator
            .aggregate_events(start, end, period, None, None)
            .await
    }
}

/// Serialized form of `SessionMetrics` for the cache.
#[derive(serde::Serialize, serde::Deserialize)]
struct CachedSessionMetrics {
    total_sessions: u64,
    unique_users: u64,
    avg_duration_seconds: f64,
    avg_page_views: f64,
    bounce_rate: f64,
    conversion_rate: f64,
    total_conversions: u64,
    total_conversion_value: f64,
}

impl From<&SessionMetrics> for CachedSessionMetrics {
    fn from(m: &SessionMetrics) -> Self {
        Self {
            total_sessions: m.total_sessions,
            unique_users: m.unique_users,
            avg_duration_seconds: m.avg_duration_seconds,
            avg_page_views: m.avg_page_views,
            bounce_rate: m.bounce_rate,
            conversion_rate: m.conversion_rate,
            total_conversions: m.total_conversions,
            total_conversion_value: m.total_conversion_value,
        }
    }
}

impl From<CachedSessionMetrics> for SessionMetrics {
    fn from(m: CachedSessionMetrics) -> Self {
        Self {
            total_sessions: m.total_sessions,
            unique_users: m.unique_users,
            avg_duration_seconds: m.avg_duration_seconds,
            avg_page_views: m.avg_page_views,
            bounce_rate: m.bounce_rate,
            conversion_rate: m.conversion_rate,
            total_conversions: m.total_conversions,
            total_conversion_value: m.total_conversion_value,
        }
    }
}
