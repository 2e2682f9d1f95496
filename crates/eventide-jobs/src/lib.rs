//! Eventide jobs - cooperative background scheduler
//!
//! One single-threaded loop drives the periodic work: the processing tick
//! and session janitor every minute, hourly aggregation at the top of the
//! hour, and the expiry sweep daily at 02:00 UTC. Every job catches its own
//! faults and records a `job_error` metric instead of crashing the
//! scheduler. A tick missed while the host was suspended or the store was
//! stalled is skipped, never replayed.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use eventide_analytics::DataAggregator;
use eventide_config::AnalyticsConfig;
use eventide_core::metric::MetricCreate;
use eventide_core::{AggregationPeriod, MetricType, Result};
use eventide_processor::EventProcessor;
use eventide_store::{AnalyticsStore, EventRepo, ExportJobRepo, SessionRepo};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Scheduler poll cadence.
const TICK: Duration = Duration::from_secs(1);
/// Processing tick and janitor interval.
const PROCESS_INTERVAL: ChronoDuration = ChronoDuration::seconds(60);
/// Events handed to the processor per tick.
const PROCESS_BATCH_SIZE: u32 = 1000;
/// Sessions closed per janitor query.
const JANITOR_BATCH: u32 = 500;
/// Hour of day (UTC) for the expiry sweep.
const EXPIRY_HOUR: u32 = 2;

pub struct JobScheduler {
    inner: Arc<Jobs>,
    worker: std::sync::Mutex<Option<WorkerHandle>>,
}

struct WorkerHandle {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

/// The job bodies, separated from the loop so they can be invoked directly.
pub struct Jobs {
    store: AnalyticsStore,
    processor: EventProcessor,
    aggregator: DataAggregator,
    session_timeout: ChronoDuration,
    retention: ChronoDuration,
}

impl JobScheduler {
    pub fn new(store: AnalyticsStore, config: &AnalyticsConfig) -> Self {
        let jobs = Jobs {
            processor: EventProcessor::new(store.clone(), PROCESS_BATCH_SIZE),
            aggregator: DataAggregator::new(store.clone()),
            store,
            session_timeout: ChronoDuration::seconds(config.session_timeout_seconds as i64),
            retention: ChronoDuration::days(config.retention_days as i64),
        };
        Self {
            inner: Arc::new(jobs),
            worker: std::sync::Mutex::new(None),
        }
    }

    /// Direct access to the job bodies (manual runs, tests).
    pub fn jobs(&self) -> Arc<Jobs> {
        Arc::clone(&self.inner)
    }

    /// Start the scheduler loop. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock().expect("scheduler worker poisoned");
        if worker.is_some() {
            tracing::warn!("Job scheduler already running");
            return;
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let jobs = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            scheduler_loop(jobs, shutdown_rx).await;
        });

        *worker = Some(WorkerHandle {
            handle,
            shutdown_tx,
        });
        tracing::info!("Job scheduler started");
    }

    pub async fn stop(&self) {
        let worker = {
            let mut guard = self.worker.lock().expect("scheduler worker poisoned");
            guard.take()
        };
        let Some(worker) = worker else { return };

        let _ = worker.shutdown_tx.send(true);
        let _ = worker.handle.await;
        tracing::info!("Job scheduler stopped");
    }
}

async fn scheduler_loop(jobs: Arc<Jobs>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    let now = Utc::now();
    let mut next_process = now + PROCESS_INTERVAL;
    let mut next_hourly = next_top_of_hour(now);
    let mut next_daily = next_daily_sweep(now);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let now = Utc::now();

                if now >= next_process {
                    jobs.run_processing_tick().await;
                    jobs.run_session_janitor().await;
                    // Advance from now: missed ticks are skipped
                    next_process = now + PROCESS_INTERVAL;
                }
                if now >= next_hourly {
                    jobs.run_hourly_aggregation().await;
                    next_hourly = next_top_of_hour(now);
                }
                if now >= next_daily {
                    jobs.run_expiry_sweep().await;
                    next_daily = next_daily_sweep(now);
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Scheduler loop exited");
}

/// The next :00 strictly after `now`.
fn next_top_of_hour(now: DateTime<Utc>) -> DateTime<Utc> {
    AggregationPeriod::Hour.truncate(now) + ChronoDuration::hours(1)
}

/// The next 02:00 UTC strictly after `now`.
fn next_daily_sweep(now: DateTime<Utc>) -> DateTime<Utc> {
    let today_sweep = AggregationPeriod::Day.truncate(now) + ChronoDuration::hours(EXPIRY_HOUR as i64);
    if now < today_sweep {
        today_sweep
    } else {
        today_sweep + ChronoDuration::days(1)
    }
}

impl Jobs {
    /// Every minute: drain a batch of unprocessed events.
    pub async fn run_processing_tick(&self) {
        let processed = self.processor.process_events().await;
        if processed > 0 {
            tracing::info!(processed = processed, "Processing tick");
        }
    }

    /// Every minute: close open sessions past the inactivity timeout.
    pub async fn run_session_janitor(&self) {
        if let Err(e) = self.close_expired_sessions().await {
            tracing::error!(error = %e, "Session janitor failed");
            self.record_job_error("session_janitor", &e).await;
        }
    }

    async fn close_expired_sessions(&self) -> Result<u64> {
        let cutoff = Utc::now() - self.session_timeout;
        let mut closed_total = 0u64;

        loop {
            let mut sess = self.store.session().await?;
            let expired = SessionRepo.get_expired(&mut sess, cutoff, JANITOR_BATCH).await?;
            if expired.is_empty() {
                break;
            }

            let batch = expired.len() as u64;
            for mut session in expired {
                session.close();
                SessionRepo.update(&mut sess, &session).await?;
            }
            sess.commit().await?;
            closed_total += batch;

            if batch < JANITOR_BATCH as u64 {
                break;
            }
        }

        if closed_total > 0 {
            tracing::info!(closed = closed_total, "Closed inactive sessions");
        }
        Ok(closed_total)
    }

    /// Top of each hour: roll up the previous hour and materialize metrics.
    pub async fn run_hourly_aggregation(&self) {
        if let Err(e) = self.aggregate_last_hour().await {
            tracing::error!(error = %e, "Hourly aggregation failed");
            self.record_job_error("hourly_aggregation", &e).await;
        }
    }

    async fn aggregate_last_hour(&self) -> Result<()> {
        let end = Utc::now();
        let start = end - ChronoDuration::hours(1);
        let hour_start = AggregationPeriod::Hour.truncate(start);

        let buckets = self
            .aggregator
            .aggregate_events(start, end, AggregationPeriod::Hour, None, None)
            .await?;
        for bucket in &buckets {
            self.aggregator
                .save_metric(
                    MetricCreate::new("events_count", MetricType::Count, bucket.count as f64)
                        .with_period(AggregationPeriod::Hour)
                        .with_dimension("event_type", json!(bucket.event_type.as_str()))
                        .with_timestamp(bucket.period_start),
                )
                .await;
        }

        let metrics = self.aggregator.calculate_session_metrics(start, end, None).await?;
        for (name, metric_type, value) in [
            ("sessions_total", MetricType::Count, metrics.total_sessions as f64),
            ("sessions_unique_users", MetricType::UniqueCount, metrics.unique_users as f64),
            ("avg_session_duration", MetricType::Average, metrics.avg_duration_seconds),
            ("bounce_rate", MetricType::BounceRate, metrics.bounce_rate),
            ("conversion_rate", MetricType::ConversionRate, metrics.conversion_rate),
        ] {
            self.aggregator
                .save_metric(
                    MetricCreate::new(name, metric_type, value)
                        .with_period(AggregationPeriod::Hour)
                        .with_timestamp(hour_start),
                )
                .await;
        }

        tracing::info!(event_buckets = buckets.len(), "Hourly aggregation complete");
        Ok(())
    }

    /// Daily at 02:00 UTC: delete expired export jobs (and their files) and
    /// prune raw events past the retention horizon.
    pub async fn run_expiry_sweep(&self) {
        if let Err(e) = self.sweep_expired().await {
            tracing::error!(error = %e, "Expiry sweep failed");
            self.record_job_error("expiry_sweep", &e).await;
        }
    }

    async fn sweep_expired(&self) -> Result<()> {
        let now = Utc::now();
        let mut sess = self.store.session().await?;

        let expired = ExportJobRepo.get_expired(&mut sess, now).await?;
        let export_count = expired.len();
        for job in expired {
            if let Some(path) = &job.file_path {
                match tokio::fs::remove_file(path).await {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => {
                        tracing::warn!(job_id = %job.id, path = path, error = %e, "Could not delete export file");
                    }
                }
            }
            ExportJobRepo.delete(&mut sess, &job.id).await?;
        }

        let pruned = EventRepo.delete_older_than(&mut sess, now - self.retention).await?;
        sess.commit().await?;

        tracing::info!(
            exports_deleted = export_count,
            events_pruned = pruned,
            "Expiry sweep complete"
        );
        Ok(())
    }

    async fn record_job_error(&self, job: &str, error: &eventide_core::Error) {
        self.aggregator
            .save_metric(
                MetricCreate::new("job_error", MetricType::Counter, 1.0)
                    .with_dimension("job", json!(job))
                    .with_dimension("error", json!(error.to_string())),
            )
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use eventide_core::event::{EventCreate, EventQuery};
    use eventide_core::export::{ExportFormat, ExportJob, ExportStatus};
    use eventide_core::metric::MetricQuery;
    use eventide_core::{generate_id, Event, EventType, Session};
    use eventide_store::MetricRepo;

    fn test_config() -> AnalyticsConfig {
        AnalyticsConfig::default()
    }

    async fn scheduler() -> (AnalyticsStore, JobScheduler) {
        let store = AnalyticsStore::in_memory().await.unwrap();
        let scheduler = JobScheduler::new(store.clone(), &test_config());
        (store, scheduler)
    }

    #[test]
    fn test_next_top_of_hour() {
        let now = Utc.with_ymd_and_hms(2024, 5, 1, 10, 30, 15).unwrap();
        assert_eq!(
            next_top_of_hour(now),
            Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap()
        );
        // Exactly on the hour schedules the NEXT hour
        let on_the_hour = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        assert_eq!(
            next_top_of_hour(on_the_hour),
            Utc.with_ymd_and_hms(2024, 5, 1, 11, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_next_daily_sweep() {
        let before = Utc.with_ymd_and_hms(2024, 5, 1, 1, 0, 0).unwrap();
        assert_eq!(
            next_daily_sweep(before),
            Utc.with_ymd_and_hms(2024, 5, 1, 2, 0, 0).unwrap()
        );
        let after = Utc.with_ymd_and_hms(2024, 5, 1, 14, 0, 0).unwrap();
        assert_eq!(
            next_daily_sweep(after),
            Utc.with_ymd_and_hms(2024, 5, 2, 2, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_processing_tick_processes_events() {
        let (store, scheduler) = scheduler().await;

        {
            let mut sess = store.session().await.unwrap();
            let event = Event::from_create(
                generate_id(),
                EventCreate::new("view", EventType::PageView).with_user("u1"),
            );
            EventRepo.create(&mut sess, &event).await.unwrap();
            sess.commit().await.unwrap();
        }

        scheduler.jobs().run_processing_tick().await;

        let mut sess = store.session().await.unwrap();
        let unprocessed = EventRepo.get_unprocessed(&mut sess, 10).await.unwrap();
        assert!(unprocessed.is_empty());
    }

    #[tokio::test]
    async fn test_janitor_closes_only_stale_sessions() {
        let (store, scheduler) = scheduler().await;

        let stale = Session::open("u1", Utc::now() - ChronoDuration::hours(2));
        let fresh = Session::open("u2", Utc::now());
        {
            let mut sess = store.session().await.unwrap();
            SessionRepo.create(&mut sess, &stale).await.unwrap();
            SessionRepo.create(&mut sess, &fresh).await.unwrap();
            sess.commit().await.unwrap();
        }

        scheduler.jobs().run_session_janitor().await;

        let mut sess = store.session().await.unwrap();
        let closed = SessionRepo.get_by_id(&mut sess, &stale.id).await.unwrap().unwrap();
        assert!(!closed.is_open());
        assert_eq!(closed.ended_at, Some(closed.last_activity_at));
        assert!(closed.duration_seconds.is_some());

        let open = SessionRepo.get_by_id(&mut sess, &fresh.id).await.unwrap().unwrap();
        assert!(open.is_open());
    }

    #[tokio::test]
    async fn test_janitor_is_idempotent() {
        let (store, scheduler) = scheduler().await;

        let stale = Session::open("u1", Utc::now() - ChronoDuration::hours(2));
        {
            let mut sess = store.session().await.unwrap();
            SessionRepo.create(&mut sess, &stale).await.unwrap();
            sess.commit().await.unwrap();
        }

        scheduler.jobs().run_session_janitor().await;
        let first = {
            let mut sess = store.session().await.unwrap();
            SessionRepo.get_by_id(&mut sess, &stale.id).await.unwrap().unwrap()
        };

        scheduler.jobs().run_session_janitor().await;
        let second = {
            let mut sess = store.session().await.unwrap();
            SessionRepo.get_by_id(&mut sess, &stale.id).await.unwrap().unwrap()
        };

        assert_eq!(first.ended_at, second.ended_at);
        assert_eq!(first.duration_seconds, second.duration_seconds);
    }

    #[tokio::test]
    async fn test_hourly_aggregation_materializes_metrics() {
        let (store, scheduler) = scheduler().await;

        {
            let mut sess = store.session().await.unwrap();
            let event = Event::from_create(
                generate_id(),
                EventCreate::new("view", EventType::PageView)
                    .with_user("u1")
                    .with_timestamp(Utc::now() - ChronoDuration::minutes(30)),
            );
            EventRepo.create(&mut sess, &event).await.unwrap();
            sess.commit().await.unwrap();
        }

        scheduler.jobs().run_hourly_aggregation().await;

        let mut sess = store.session().await.unwrap();
        let query = MetricQuery {
            names: Some(vec!["events_count".to_string()]),
            ..Default::default()
        };
        let metrics = MetricRepo.get_by_filters(&mut sess, &query).await.unwrap();
        assert!(!metrics.is_empty());
        assert_eq!(metrics[0].period, Some(AggregationPeriod::Hour));
    }

    #[tokio::test]
    async fn test_expiry_sweep_removes_jobs_and_files() {
        let (store, scheduler) = scheduler().await;

        let dir = tempfile::TempDir::new().unwrap();
        let file_path = dir.path().join("export.csv");
        tokio::fs::write(&file_path, "a,b,c\n").await.unwrap();

        let job = ExportJob {
            id: generate_id(),
            name: "old export".to_string(),
            export_type: "events".to_string(),
            format: ExportFormat::Csv,
            query_params: None,
            status: ExportStatus::Completed,
            file_path: Some(file_path.display().to_string()),
            file_size: Some(6),
            row_count: Some(1),
            error_message: None,
            user_id: None,
            created_at: Utc::now() - ChronoDuration::days(10),
            started_at: None,
            completed_at: Some(Utc::now() - ChronoDuration::days(9)),
            expires_at: Some(Utc::now() - ChronoDuration::days(1)),
        };
        {
            let mut sess = store.session().await.unwrap();
            ExportJobRepo.create(&mut sess, &job).await.unwrap();
            sess.commit().await.unwrap();
        }

        scheduler.jobs().run_expiry_sweep().await;

        assert!(!file_path.exists());
        let mut sess = store.session().await.unwrap();
        assert!(ExportJobRepo.get_by_id(&mut sess, &job.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_expiry_sweep_prunes_old_events() {
        let (store, scheduler) = scheduler().await;

        {
            let mut sess = store.session().await.unwrap();
            let ancient = Event::from_create(
                generate_id(),
                EventCreate::new("view", EventType::PageView)
                    .with_timestamp(Utc::now() - ChronoDuration::days(120)),
            );
            let recent = Event::from_create(
                generate_id(),
                EventCreate::new("view", EventType::PageView),
            );
            EventRepo.create(&mut sess, &ancient).await.unwrap();
            EventRepo.create(&mut sess, &recent).await.unwrap();
            sess.commit().await.unwrap();
        }

        scheduler.jobs().run_expiry_sweep().await;

        let mut sess = store.session().await.unwrap();
        let remaining = EventRepo.count(&mut sess, &EventQuery::new()).await.unwrap();
        assert_eq!(remaining, 1);
    }

    #[tokio::test]
    async fn test_start_stop_lifecycle() {
        let (_store, scheduler) = scheduler().await;
        scheduler.start();
        // Double start logs and keeps the first worker
        scheduler.start();
        scheduler.stop().await;
        // Stop after stop is a no-op
        scheduler.stop().await;
    }
}
