//! In-memory, priority-aware, rate-limited build queue.
//!
//! The queue serializes execution of build jobs against the external
//! executor: at most one job runs at a time, and no more than
//! `max_requests_per_minute` jobs are dispatched within a rolling minute.
//! High-priority jobs occupy a contiguous FIFO prefix of the queue;
//! normal jobs follow in insertion order.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use appforge_config::QueueConfig;
use appforge_core::{Error, JobExecutor, ResourceId, Result};
use appforge_store::ScheduleStore;

/// Length of the rolling rate-limit window.
const RATE_WINDOW: Duration = Duration::from_secs(60);

/// Priority class of a queued job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    #[default]
    Normal,
    High,
}

/// Result status of an enqueue call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EnqueueStatus {
    Queued,
    AlreadyQueued,
}

/// Position info returned from an enqueue call.
#[derive(Debug, Clone, Serialize)]
pub struct EnqueueOutcome {
    pub status: EnqueueStatus,
    /// 1-based position in the queue.
    pub position: usize,
    pub queue_length: usize,
    pub estimated_start: DateTime<Utc>,
}

/// Outcome of a single processing tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Queue was empty.
    Idle,
    /// A job is already in flight.
    Busy,
    /// Rate limit reached; deferred to a later tick.
    RateLimited,
    /// A job was dispatched and finished.
    Processed { success: bool },
}

/// Summary of a queued job, as exposed by [`JobQueue::queue_status`].
#[derive(Debug, Clone, Serialize)]
pub struct QueuedJobSummary {
    pub id: ResourceId,
    pub priority: QueuePriority,
    pub added_at: DateTime<Utc>,
}

/// Cumulative processing statistics.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    /// Completion time of the most recent successful job.
    pub last_processed: Option<DateTime<Utc>>,
    /// Exponentially weighted moving average of processing latency.
    pub average_processing_ms: f64,
}

impl QueueStats {
    fn observe_success(&mut self, elapsed_ms: f64, now: DateTime<Utc>) {
        self.total_processed += 1;
        self.successful += 1;
        self.last_processed = Some(now);
        if self.average_processing_ms == 0.0 {
            self.average_processing_ms = elapsed_ms;
        } else {
            // 80% previous average, 20% new sample.
            self.average_processing_ms = self.average_processing_ms * 0.8 + elapsed_ms * 0.2;
        }
    }

    fn observe_failure(&mut self) {
        self.total_processed += 1;
        self.failed += 1;
    }
}

/// Rate-limit window state, as exposed by [`JobQueue::queue_status`].
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitSnapshot {
    pub requests_this_minute: u32,
    pub max_requests_per_minute: u32,
    /// Seconds until the window resets.
    pub resets_in_secs: u64,
}

/// Read-only snapshot of the queue.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatusSnapshot {
    pub queue_length: usize,
    pub processing: bool,
    pub rate_limit: RateLimitSnapshot,
    pub stats: QueueStats,
    pub queue: Vec<QueuedJobSummary>,
}

#[derive(Debug)]
struct QueuedJob {
    id: ResourceId,
    payload: serde_json::Value,
    priority: QueuePriority,
    added_at: DateTime<Utc>,
}

struct QueueState {
    jobs: VecDeque<QueuedJob>,
    processing: bool,
    requests_this_minute: u32,
    max_requests_per_minute: u32,
    window_started: Instant,
    stats: QueueStats,
}

impl QueueState {
    /// Index just past the high-priority prefix.
    fn high_prefix_end(&self) -> usize {
        self.jobs
            .iter()
            .take_while(|j| j.priority == QueuePriority::High)
            .count()
    }

    fn reset_window_if_elapsed(&mut self) {
        if self.window_started.elapsed() >= RATE_WINDOW {
            self.requests_this_minute = 0;
            self.window_started = Instant::now();
        }
    }

    fn estimated_start(&self, index: usize) -> DateTime<Utc> {
        let per_minute = self.max_requests_per_minute.max(1) as usize;
        let minutes = index.div_ceil(per_minute) as i64;
        Utc::now() + chrono::Duration::minutes(minutes)
    }
}

/// The build queue.
///
/// Mutations of the priority-ordered structure happen only under the state
/// mutex, which is never held across an await point; executor calls run with
/// the lock released so enqueues proceed while a job is in flight.
pub struct JobQueue {
    executor: Arc<dyn JobExecutor>,
    store: Arc<dyn ScheduleStore>,
    state: Mutex<QueueState>,
    tick_period: Duration,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        executor: Arc<dyn JobExecutor>,
        config: &QueueConfig,
    ) -> Self {
        Self {
            executor,
            store,
            state: Mutex::new(QueueState {
                jobs: VecDeque::new(),
                processing: false,
                requests_this_minute: 0,
                max_requests_per_minute: config.max_requests_per_minute.max(1),
                window_started: Instant::now(),
                stats: QueueStats::default(),
            }),
            tick_period: config.tick(),
            task: Mutex::new(None),
        }
    }

    /// Start the tick loop. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.task.lock().await;
        if slot.is_some() {
            return;
        }
        info!(tick_ms = self.tick_period.as_millis() as u64, "starting build queue processor");
        let queue = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = time::interval(queue.tick_period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                queue.process_tick().await;
            }
        }));
    }

    /// Stop the tick loop. In-flight work is not interrupted. Idempotent.
    pub async fn stop(&self) {
        let mut slot = self.task.lock().await;
        if let Some(handle) = slot.take() {
            info!("stopping build queue processor");
            handle.abort();
        }
    }

    /// Add a job to the queue.
    ///
    /// If the id is already queued, the existing entry is kept (optionally
    /// promoted to the end of the high-priority prefix) and
    /// `AlreadyQueued` is returned with the current position. Otherwise the
    /// job is inserted at its priority position and the schedule record is
    /// marked as queued in the store.
    pub async fn enqueue(
        &self,
        id: ResourceId,
        payload: serde_json::Value,
        priority: QueuePriority,
    ) -> Result<EnqueueOutcome> {
        let mut record = self.store.get(id).await.map_err(Error::from)?;

        let (outcome, newly_queued) = {
            let mut state = self.state.lock().await;

            if let Some(pos) = state.jobs.iter().position(|j| j.id == id) {
                if priority == QueuePriority::High
                    && state.jobs[pos].priority != QueuePriority::High
                {
                    if let Some(mut job) = state.jobs.remove(pos) {
                        job.priority = QueuePriority::High;
                        let insert_at = state.high_prefix_end();
                        state.jobs.insert(insert_at, job);
                        debug!(record_id = %id, "promoted queued job to high priority");
                    }
                }

                let position = state
                    .jobs
                    .iter()
                    .position(|j| j.id == id)
                    .map_or(1, |p| p + 1);
                (
                    EnqueueOutcome {
                        status: EnqueueStatus::AlreadyQueued,
                        position,
                        queue_length: state.jobs.len(),
                        estimated_start: state.estimated_start(position - 1),
                    },
                    false,
                )
            } else {
                let job = QueuedJob {
                    id,
                    payload,
                    priority,
                    added_at: Utc::now(),
                };
                match priority {
                    QueuePriority::High => {
                        let insert_at = state.high_prefix_end();
                        state.jobs.insert(insert_at, job);
                    }
                    QueuePriority::Normal => state.jobs.push_back(job),
                }

                let position = state
                    .jobs
                    .iter()
                    .position(|j| j.id == id)
                    .map_or(1, |p| p + 1);
                (
                    EnqueueOutcome {
                        status: EnqueueStatus::Queued,
                        position,
                        queue_length: state.jobs.len(),
                        estimated_start: state.estimated_start(position - 1),
                    },
                    true,
                )
            }
        };

        if newly_queued {
            record.mark_queued(Utc::now());
            self.store.save(record).await.map_err(Error::from)?;
            info!(record_id = %id, position = outcome.position, "queued build job");
        }

        Ok(outcome)
    }

    /// Remove a not-yet-dispatched job from the queue.
    ///
    /// This is the only cancellation the queue offers; in-flight executor
    /// calls are never interrupted.
    pub async fn remove(&self, id: ResourceId) -> bool {
        let mut state = self.state.lock().await;
        if let Some(pos) = state.jobs.iter().position(|j| j.id == id) {
            state.jobs.remove(pos);
            debug!(record_id = %id, "removed job from queue");
            true
        } else {
            false
        }
    }

    /// Process the next job, if the exclusivity and rate-limit checks allow.
    ///
    /// Invoked periodically by the tick loop; also callable directly
    /// (tests, manual draining). Failures are converted into record state
    /// and stats updates, never propagated.
    pub async fn process_tick(&self) -> TickOutcome {
        // Check-and-set happens under a single lock acquisition; the lock
        // is dropped before the executor is awaited.
        let job = {
            let mut state = self.state.lock().await;
            if state.processing {
                return TickOutcome::Busy;
            }
            if state.jobs.is_empty() {
                return TickOutcome::Idle;
            }

            state.reset_window_if_elapsed();
            if state.requests_this_minute >= state.max_requests_per_minute {
                debug!(
                    requests = state.requests_this_minute,
                    limit = state.max_requests_per_minute,
                    "rate limit reached, deferring to next tick"
                );
                return TickOutcome::RateLimited;
            }

            let Some(job) = state.jobs.pop_front() else {
                return TickOutcome::Idle;
            };
            state.processing = true;
            state.requests_this_minute += 1;
            job
        };

        info!(record_id = %job.id, priority = ?job.priority, "processing build job");
        let started = Instant::now();
        let result = self.run_job(&job).await;
        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;

        let success = match result {
            Ok(()) => {
                info!(record_id = %job.id, elapsed_ms, "build job succeeded");
                true
            }
            Err(e) => {
                error!(record_id = %job.id, error = %e, "build job failed");
                false
            }
        };

        let mut state = self.state.lock().await;
        state.processing = false;
        if success {
            state.stats.observe_success(elapsed_ms, Utc::now());
        } else {
            state.stats.observe_failure();
        }
        TickOutcome::Processed { success }
    }

    async fn run_job(&self, job: &QueuedJob) -> Result<()> {
        let mut record = self.store.get(job.id).await.map_err(Error::from)?;
        // A record cancelled after it was queued must not execute.
        record.begin_processing()?;
        self.store.save(record.clone()).await.map_err(Error::from)?;

        match self.executor.execute(&job.payload).await {
            Ok(()) => {
                record.complete_run(Utc::now())?;
                self.store.save(record).await.map_err(Error::from)?;
                Ok(())
            }
            Err(e) => {
                record.fail_run(e.to_string());
                if let Err(save_err) = self.store.save(record).await {
                    warn!(record_id = %job.id, error = %save_err, "failed to persist failure state");
                }
                Err(e)
            }
        }
    }

    /// Change the rolling-minute dispatch limit at runtime.
    pub async fn set_max_requests_per_minute(&self, limit: u32) -> Result<()> {
        if limit == 0 {
            return Err(Error::InvalidInput(
                "max requests per minute must be positive".to_string(),
            ));
        }
        let mut state = self.state.lock().await;
        state.max_requests_per_minute = limit;
        Ok(())
    }

    /// Read-only snapshot of the queue state.
    pub async fn queue_status(&self) -> QueueStatusSnapshot {
        let state = self.state.lock().await;
        let elapsed = state.window_started.elapsed();
        QueueStatusSnapshot {
            queue_length: state.jobs.len(),
            processing: state.processing,
            rate_limit: RateLimitSnapshot {
                requests_this_minute: state.requests_this_minute,
                max_requests_per_minute: state.max_requests_per_minute,
                resets_in_secs: RATE_WINDOW.saturating_sub(elapsed).as_secs(),
            },
            stats: state.stats.clone(),
            queue: state
                .jobs
                .iter()
                .map(|j| QueuedJobSummary {
                    id: j.id,
                    priority: j.priority,
                    added_at: j.added_at,
                })
                .collect(),
        }
    }
}
