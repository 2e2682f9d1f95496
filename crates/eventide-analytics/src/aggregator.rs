//! Data aggregator
//!
//! Time-bucketed rollups over events and sessions, metric materialization,
//! and time-series reads. Bucketing happens in process after a typed range
//! query; unique counts are exact (hash sets per bucket).
//!
//! Every read degrades to its empty result on fault; only an exceeded
//! deadline surfaces as an error.

use crate::{round2, with_deadline};
use chrono::{DateTime, Duration, Utc};
use eventide_core::metric::{MetricCreate, TimeSeriesPoint};
use eventide_core::types::safe_divide;
use eventide_core::{AggregationPeriod, EventType, Result};
use eventide_store::{AnalyticsStore, EventRepo, MetricRepo, SessionRepo};
use std::collections::{BTreeMap, HashSet};

/// Event fields that can be grouped by in `aggregate_by_dimension`.
const DIMENSIONS: &[&str] = &["country", "device_type", "browser", "os", "module"];

/// One (period, event type) rollup bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBucket {
    pub period_start: DateTime<Utc>,
    pub event_type: EventType,
    pub count: u64,
    pub unique_users: u64,
    pub unique_sessions: u64,
}

/// Session-level rollup for a window.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionMetrics {
    pub total_sessions: u64,
    pub unique_users: u64,
    pub avg_duration_seconds: f64,
    pub avg_page_views: f64,
    pub bounce_rate: f64,
    pub conversion_rate: f64,
    pub total_conversions: u64,
    pub total_conversion_value: f64,
}

/// One value of a dimension rollup.
#[derive(Debug, Clone, PartialEq)]
pub struct DimensionBucket {
    pub dimension: String,
    pub value: String,
    pub count: u64,
    pub unique_users: u64,
}

/// One period of the day-cohort retention rollup.
#[derive(Debug, Clone, PartialEq)]
pub struct RetentionPoint {
    pub period: u32,
    pub period_start: DateTime<Utc>,
    pub active_users: u64,
    pub retention_rate: f64,
}

pub struct DataAggregator {
    store: AnalyticsStore,
}

impl DataAggregator {
    pub fn new(store: AnalyticsStore) -> Self {
        Self { store }
    }

    /// Bucket events by `(truncate(period, timestamp), event_type)`.
    pub async fn aggregate_events(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: AggregationPeriod,
        event_types: Option<&[EventType]>,
        deadline: Option<std::time::Duration>,
    ) -> Result<Vec<EventBucket>> {
        let body = async {
            let mut sess = self.store.session().await?;
            let events = EventRepo.get_in_range(&mut sess, start, end, event_types).await?;

            struct Acc {
                count: u64,
                users: HashSet<String>,
                sessions: HashSet<String>,
            }
            let mut buckets: BTreeMap<(DateTime<Utc>, &'static str), (EventType, Acc)> =
                BTreeMap::new();

            for event in &events {
                let key = (period.truncate(event.timestamp), event.event_type.as_str());
                let entry = buckets.entry(key).or_insert_with(|| {
                    (
                        event.event_type,
                        Acc {
                            count: 0,
                            users: HashSet::new(),
                            sessions: HashSet::new(),
                        },
                    )
                });
                entry.1.count += 1;
                if let Some(user) = &event.user_id {
                    entry.1.users.insert(user.clone());
                }
                if let Some(session) = &event.session_id {
                    entry.1.sessions.insert(session.clone());
                }
            }

            let result: Vec<EventBucket> = buckets
                .into_iter()
                .map(|((period_start, _), (event_type, acc))| EventBucket {
                    period_start,
                    event_type,
                    count: acc.count,
                    unique_users: acc.users.len() as u64,
                    unique_sessions: acc.sessions.len() as u64,
                })
                .collect();

            tracing::info!(buckets = result.len(), period = %period, "Aggregated events");
            Ok(result)
        };

        self.degrade(with_deadline(deadline, body).await, Vec::new(), "aggregate_events")
    }

    /// Session rollup over `[start, end]`.
    pub async fn calculate_session_metrics(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        deadline: Option<std::time::Duration>,
    ) -> Result<SessionMetrics> {
        let body = async {
            let mut sess = self.store.session().await?;
            let agg = SessionRepo.aggregate_between(&mut sess, start, end).await?;

            Ok(SessionMetrics {
                total_sessions: agg.total_sessions,
                unique_users: agg.unique_users,
                avg_duration_seconds: round2(agg.avg_duration_seconds),
                avg_page_views: round2(agg.avg_page_views),
                bounce_rate: round2(
                    safe_divide(agg.bounces as f64, agg.total_sessions as f64) * 100.0,
                ),
                conversion_rate: round2(
                    safe_divide(agg.conversions as f64, agg.total_sessions as f64) * 100.0,
                ),
                total_conversions: agg.conversions,
                total_conversion_value: agg.total_conversion_value,
            })
        };

        self.degrade(
            with_deadline(deadline, body).await,
            SessionMetrics::default(),
            "calculate_session_metrics",
        )
    }

    /// Materialized time series for a metric name, ascending.
    pub async fn generate_time_series(
        &self,
        metric_name: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: Option<AggregationPeriod>,
        deadline: Option<std::time::Duration>,
    ) -> Result<Vec<TimeSeriesPoint>> {
        let body = async {
            let mut sess = self.store.session().await?;
            MetricRepo
                .get_time_series(&mut sess, metric_name, start, end, period)
                .await
        };

        self.degrade(with_deadline(deadline, body).await, Vec::new(), "generate_time_series")
    }

    /// Persist a metric value. Returns whether the write succeeded.
    pub async fn save_metric(&self, create: MetricCreate) -> bool {
        let result = async {
            let metric = create.into_metric();
            let mut sess = self.store.session().await?;
            MetricRepo.create(&mut sess, &metric).await?;
            sess.commit().await?;
            tracing::debug!(name = %metric.name, value = metric.value, "Saved metric");
            Ok::<(), eventide_core::Error>(())
        }
        .await;

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(error = %e, "Failed to save metric");
                false
            }
        }
    }

    /// Group events by a whitelisted event field. Unknown dimensions yield
    /// an empty result, not a fault.
    pub async fn aggregate_by_dimension(
        &self,
        dimension: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        event_types: Option<&[EventType]>,
        deadline: Option<std::time::Duration>,
    ) -> Result<Vec<DimensionBucket>> {
        if !DIMENSIONS.contains(&dimension) {
            tracing::warn!(dimension = dimension, "Unknown aggregation dimension");
            return Ok(Vec::new());
        }
        let dimension = dimension.to_string();

        let body = async {
            let mut sess = self.store.session().await?;
            let events = EventRepo.get_in_range(&mut sess, start, end, event_types).await?;

            let mut buckets: BTreeMap<String, (u64, HashSet<String>)> = BTreeMap::new();
            for event in &events {
                let value = match dimension.as_str() {
                    "country" => &event.country,
                    "device_type" => &event.device_type,
                    "browser" => &event.browser,
                    "os" => &event.os,
                    "module" => &event.module,
                    _ => &None,
                };
                let Some(value) = value else { continue };

                let entry = buckets.entry(value.clone()).or_default();
                entry.0 += 1;
                if let Some(user) = &event.user_id {
                    entry.1.insert(user.clone());
                }
            }

            let mut result: Vec<DimensionBucket> = buckets
                .into_iter()
                .map(|(value, (count, users))| DimensionBucket {
                    dimension: dimension.clone(),
                    value,
                    count,
                    unique_users: users.len() as u64,
                })
                .collect();
            result.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value)));
            Ok(result)
        };

        self.degrade(with_deadline(deadline, body).await, Vec::new(), "aggregate_by_dimension")
    }

    /// Day-cohort weekly retention: users with a session on the cohort day,
    /// tracked over weekly windows. The cohort engine offers the richer
    /// variant keyed on first-seen.
    pub async fn calculate_retention(
        &self,
        cohort_date: DateTime<Utc>,
        periods: u32,
        deadline: Option<std::time::Duration>,
    ) -> Result<Vec<RetentionPoint>> {
        let body = async {
            let cohort_start = AggregationPeriod::Day.truncate(cohort_date);
            let cohort_end = cohort_start + Duration::days(1);

            let mut sess = self.store.session().await?;
            let cohort_users = SessionRepo
                .user_ids_started_between(&mut sess, cohort_start, cohort_end)
                .await?;
            let initial = cohort_users.len() as u64;
            if initial == 0 {
                return Ok(Vec::new());
            }

            let mut result = Vec::with_capacity(periods as usize);
            for period in 0..periods {
                let period_start = cohort_start + Duration::weeks(period as i64);
                let period_end = period_start + Duration::weeks(1);
                let active = SessionRepo
                    .count_active_in_window(&mut sess, &cohort_users, period_start, period_end)
                    .await?;

                result.push(RetentionPoint {
                    period,
                    period_start,
                    active_users: active,
                    retention_rate: round2(safe_divide(active as f64, initial as f64) * 100.0),
                });
            }

            Ok(result)
        };

        self.degrade(with_deadline(deadline, body).await, Vec::new(), "calculate_retention")
    }

    /// Timeout propagates; any other fault logs and yields the empty value.
    fn degrade<T>(&self, result: Result<T>, empty: T, operation: &str) -> Result<T> {
        match result {
            Ok(value) => Ok(value),
            Err(e @ eventide_core::Error::Timeout(_)) => Err(e),
            Err(e) => {
                tracing::error!(operation = operation, error = %e, "Aggregator fault");
                Ok(empty)
            }
        }
    }
}
