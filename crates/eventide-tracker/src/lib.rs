//! Eventide tracker - buffered event ingestion
//!
//! A bounded in-memory FIFO queue in front of the store, drained by a
//! background flusher. Producers validate and enqueue synchronously; the
//! flusher batches events into one store session per flush. A full queue
//! drops the newest event and counts the drop; a failed flush leaves the
//! batch queued and retries with exponential backoff.

use eventide_config::AnalyticsConfig;
use eventide_core::event::{Event, EventCreate, EventId};
use eventide_core::{generate_id, Result};
use eventide_store::{AnalyticsStore, EventRepo};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Worker wake-up cadence.
const TICK: Duration = Duration::from_millis(100);
/// Backoff for a failing flush starts here and doubles per attempt.
const RETRY_BASE: Duration = Duration::from_millis(100);
/// Backoff ceiling.
const RETRY_CAP: Duration = Duration::from_secs(1);
/// Consecutive failures before the tracker escalates to an error log.
const FAILURE_ALARM_THRESHOLD: u32 = 5;
/// Bound on draining at shutdown.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Events handed to the store per flush.
    pub batch_size: usize,
    /// Time-based flush trigger.
    pub flush_interval: Duration,
    /// Queue bound; the newest event is dropped beyond it.
    pub queue_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            flush_interval: Duration::from_secs(5),
            queue_capacity: 100_000,
        }
    }
}

impl From<&AnalyticsConfig> for TrackerConfig {
    fn from(config: &AnalyticsConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            flush_interval: Duration::from_secs(config.flush_interval_seconds),
            queue_capacity: config.queue_capacity,
        }
    }
}

struct Inner {
    store: AnalyticsStore,
    config: TrackerConfig,
    queue: Mutex<VecDeque<Event>>,
    last_flush: Mutex<Instant>,
    // Serializes flushes so the explicit flush() and the worker never hand
    // the same batch to the store twice.
    flush_lock: tokio::sync::Mutex<()>,
    dropped: AtomicU64,
    flush_failures: AtomicU64,
    running: AtomicBool,
}

/// Buffered event tracker. Clone-cheap; all clones share one queue.
#[derive(Clone)]
pub struct EventTracker {
    inner: Arc<Inner>,
    worker: Arc<Mutex<Option<WorkerHandle>>>,
}

struct WorkerHandle {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl EventTracker {
    pub fn new(store: AnalyticsStore, config: TrackerConfig) -> Self {
        tracing::info!(
            batch_size = config.batch_size,
            flush_interval_ms = config.flush_interval.as_millis() as u64,
            queue_capacity = config.queue_capacity,
            "Event tracker initialized"
        );
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                queue: Mutex::new(VecDeque::new()),
                last_flush: Mutex::new(Instant::now()),
                flush_lock: tokio::sync::Mutex::new(()),
                dropped: AtomicU64::new(0),
                flush_failures: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
            worker: Arc::new(Mutex::new(None)),
        }
    }

    /// Validate and enqueue one event.
    ///
    /// Returns the assigned event id, or `None` when validation fails or
    /// the queue is full (the drop is counted either way).
    pub fn track(&self, create: EventCreate) -> Option<EventId> {
        self.track_event(create).map(|event| event.id)
    }

    /// Like `track`, but returns the accepted event as enqueued.
    pub fn track_event(&self, create: EventCreate) -> Option<Event> {
        if let Err(e) = create.validate() {
            tracing::warn!(name = %create.name, error = %e, "Event rejected");
            return None;
        }

        let event = Event::from_create(generate_id(), create);

        let mut queue = self.inner.queue.lock().expect("tracker queue poisoned");
        if queue.len() >= self.inner.config.queue_capacity {
            drop(queue);
            let dropped = self.inner.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            tracing::warn!(dropped_total = dropped, "Tracker queue full, dropping event");
            return None;
        }
        let accepted = event.clone();
        queue.push_back(event);
        Some(accepted)
    }

    /// Validate and enqueue a batch: all events or none.
    pub fn track_batch(&self, batch: Vec<EventCreate>) -> Option<Vec<EventId>> {
        for create in &batch {
            if let Err(e) = create.validate() {
                tracing::warn!(name = %create.name, error = %e, "Batch rejected");
                return None;
            }
        }

        let events: Vec<Event> = batch
            .into_iter()
            .map(|create| Event::from_create(generate_id(), create))
            .collect();
        let ids: Vec<EventId> = events.iter().map(|e| e.id.clone()).collect();

        let mut queue = self.inner.queue.lock().expect("tracker queue poisoned");
        if queue.len() + events.len() > self.inner.config.queue_capacity {
            drop(queue);
            let dropped = self
                .inner
                .dropped
                .fetch_add(ids.len() as u64, Ordering::Relaxed)
                + ids.len() as u64;
            tracing::warn!(
                batch = ids.len(),
                dropped_total = dropped,
                "Tracker queue full, dropping batch"
            );
            return None;
        }
        queue.extend(events);
        Some(ids)
    }

    /// Drain up to `batch_size` events into one store session.
    ///
    /// Returns the number persisted. A failure leaves the batch queued for
    /// the next attempt.
    pub async fn flush(&self) -> Result<u64> {
        self.inner.flush().await
    }

    /// Start the background flusher. Idempotent.
    pub fn start(&self) {
        let mut worker = self.worker.lock().expect("tracker worker poisoned");
        if worker.is_some() {
            tracing::warn!("Event tracker already running");
            return;
        }

        self.inner.running.store(true, Ordering::SeqCst);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            worker_loop(inner, shutdown_rx).await;
        });

        *worker = Some(WorkerHandle {
            handle,
            shutdown_tx,
        });
        tracing::info!("Event tracker worker started");
    }

    /// Stop the background flusher.
    ///
    /// With `flush_remaining`, the queue is drained with a bounded deadline;
    /// whatever survives the deadline is dropped and counted.
    pub async fn stop(&self, flush_remaining: bool) {
        let worker = {
            let mut guard = self.worker.lock().expect("tracker worker poisoned");
            guard.take()
        };
        let Some(worker) = worker else {
            return;
        };

        self.inner.running.store(false, Ordering::SeqCst);
        let _ = worker.shutdown_tx.send(true);
        if tokio::time::timeout(DRAIN_TIMEOUT, worker.handle).await.is_err() {
            tracing::warn!("Tracker worker did not stop within the join timeout");
        }

        if flush_remaining {
            let deadline = Instant::now() + DRAIN_TIMEOUT;
            while self.queue_size() > 0 && Instant::now() < deadline {
                if self.inner.flush().await.is_err() {
                    tokio::time::sleep(RETRY_BASE).await;
                }
            }
        }

        let remaining = self.queue_size();
        if remaining > 0 {
            self.inner
                .dropped
                .fetch_add(remaining as u64, Ordering::Relaxed);
            self.inner.queue.lock().expect("tracker queue poisoned").clear();
            tracing::warn!(remaining = remaining, "Dropping unflushed events at shutdown");
        }

        tracing::info!("Event tracker worker stopped");
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Estimate of the number of queued events.
    pub fn queue_size(&self) -> usize {
        self.inner.queue.lock().expect("tracker queue poisoned").len()
    }

    /// Events dropped at the queue bound or at shutdown.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }
}

impl Inner {
    async fn flush(&self) -> Result<u64> {
        let _guard = self.flush_lock.lock().await;

        // Snapshot the head of the queue without dequeuing; a failed write
        // must leave the batch in place.
        let batch: Vec<Event> = {
            let queue = self.queue.lock().expect("tracker queue poisoned");
            queue.iter().take(self.config.batch_size).cloned().collect()
        };

        if batch.is_empty() {
            *self.last_flush.lock().expect("tracker clock poisoned") = Instant::now();
            return Ok(0);
        }

        let result = async {
            let mut sess = self.store.session().await?;
            let n = EventRepo.bulk_create(&mut sess, &batch).await?;
            sess.commit().await?;
            Ok::<u64, eventide_core::Error>(n)
        }
        .await;

        match result {
            Ok(n) => {
                let mut queue = self.queue.lock().expect("tracker queue poisoned");
                for _ in 0..batch.len() {
                    queue.pop_front();
                }
                drop(queue);
                *self.last_flush.lock().expect("tracker clock poisoned") = Instant::now();
                self.flush_failures.store(0, Ordering::Relaxed);
                tracing::info!(count = n, "Flushed events to store");
                Ok(n)
            }
            Err(e) => {
                let failures = self.flush_failures.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(error = %e, failures = failures, "Flush failed, batch stays queued");
                Err(e)
            }
        }
    }

    fn should_flush(&self) -> bool {
        let queue_len = self.queue.lock().expect("tracker queue poisoned").len();
        if queue_len == 0 {
            return false;
        }
        if queue_len >= self.config.batch_size {
            return true;
        }
        let last = *self.last_flush.lock().expect("tracker clock poisoned");
        last.elapsed() >= self.config.flush_interval
    }
}

/// Flush retry state: idle, or backing off after `attempts` failures.
enum FlushState {
    Idle,
    Retry { attempts: u32, next_at: Instant },
}

async fn worker_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let mut interval = tokio::time::interval(TICK);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut state = FlushState::Idle;

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let due = match &state {
                    FlushState::Idle => inner.should_flush(),
                    FlushState::Retry { next_at, .. } => Instant::now() >= *next_at,
                };
                if !due {
                    continue;
                }

                match inner.flush().await {
                    Ok(_) => state = FlushState::Idle,
                    Err(_) => {
                        let attempts = match state {
                            FlushState::Idle => 1,
                            FlushState::Retry { attempts, .. } => attempts + 1,
                        };
                        let backoff = RETRY_BASE
                            .saturating_mul(1u32 << (attempts - 1).min(4))
                            .min(RETRY_CAP);
                        if attempts == FAILURE_ALARM_THRESHOLD {
                            tracing::error!(
                                attempts = attempts,
                                queued = inner.queue.lock().expect("tracker queue poisoned").len(),
                                "Repeated flush failures, events remain queued"
                            );
                        }
                        state = FlushState::Retry {
                            attempts,
                            next_at: Instant::now() + backoff,
                        };
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::debug!("Tracker worker loop exited");
}
