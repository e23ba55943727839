//! Polling scheduler for due build jobs.
//!
//! The scheduler owns the passage of time: a fixed-period poll finds
//! pending records whose `next_run` has arrived and dispatches each one as
//! an independent task. The dispatch loop never awaits an execution, so a
//! slow build cannot delay the poll; the [`ActiveJobs`] registry keeps a
//! record from being dispatched twice while its execution is in flight.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use appforge_config::SchedulerConfig;
use appforge_core::JobExecutor;
use appforge_core::schedule::ScheduleRecord;
use appforge_store::ScheduleStore;

use crate::registry::{ActiveJobGuard, ActiveJobs};

/// Polls the schedule store and drives due records to completion.
pub struct Scheduler {
    store: Arc<dyn ScheduleStore>,
    executor: Arc<dyn JobExecutor>,
    active: Arc<ActiveJobs>,
    poll_interval: Duration,
    poll_task: Mutex<Option<JoinHandle<()>>>,
    inflight: Mutex<JoinSet<()>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        executor: Arc<dyn JobExecutor>,
        config: &SchedulerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            active: Arc::new(ActiveJobs::new()),
            poll_interval: config.poll_interval(),
            poll_task: Mutex::new(None),
            inflight: Mutex::new(JoinSet::new()),
        }
    }

    /// Start polling. The first due-check runs immediately. Idempotent.
    pub async fn start(self: &Arc<Self>) {
        let mut slot = self.poll_task.lock().await;
        if slot.is_some() {
            return;
        }
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "starting scheduler"
        );
        let scheduler = Arc::clone(self);
        *slot = Some(tokio::spawn(async move {
            let mut ticker = time::interval(scheduler.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                scheduler.check_due(Utc::now()).await;
            }
        }));
    }

    /// Stop polling. In-flight executions keep running. Idempotent.
    pub async fn stop(&self) {
        let mut slot = self.poll_task.lock().await;
        if let Some(handle) = slot.take() {
            info!("stopping scheduler");
            handle.abort();
        }
    }

    /// Wait for all currently in-flight executions to finish.
    pub async fn drain(&self) {
        let mut inflight = self.inflight.lock().await;
        while inflight.join_next().await.is_some() {}
    }

    /// Find due records and dispatch each one as an independent task.
    ///
    /// Records already claimed in the active registry are skipped, so
    /// calling this repeatedly while an execution is still pending invokes
    /// the executor exactly once per record.
    pub async fn check_due(&self, now: DateTime<Utc>) {
        let due = match self.store.find_due(now).await {
            Ok(due) => due,
            Err(e) => {
                error!(error = %e, "failed to query due schedules");
                return;
            }
        };
        if due.is_empty() {
            return;
        }
        debug!(count = due.len(), "found due schedules");

        let mut inflight = self.inflight.lock().await;
        // Reap tasks that finished since the last tick.
        while inflight.try_join_next().is_some() {}

        for record in due {
            let Some(guard) = self.active.begin(record.id) else {
                debug!(record_id = %record.id, "already executing, skipping");
                continue;
            };
            let store = Arc::clone(&self.store);
            let executor = Arc::clone(&self.executor);
            inflight.spawn(async move {
                Self::execute(store, executor, record, guard).await;
            });
        }
    }

    /// Execute one record: mark it processing, run the executor, then
    /// record the outcome. A failure is terminal for this attempt only;
    /// it never reschedules the record and never propagates.
    async fn execute(
        store: Arc<dyn ScheduleStore>,
        executor: Arc<dyn JobExecutor>,
        mut record: ScheduleRecord,
        _guard: ActiveJobGuard,
    ) {
        info!(record_id = %record.id, title = %record.title, "executing scheduled build");

        if let Err(e) = record.begin_processing() {
            warn!(record_id = %record.id, error = %e, "record no longer runnable, skipping");
            return;
        }
        if let Err(e) = store.save(record.clone()).await {
            error!(record_id = %record.id, error = %e, "failed to mark record processing");
            return;
        }

        match executor.execute(&record.payload).await {
            Ok(()) => {
                if let Err(e) = record.complete_run(Utc::now()) {
                    warn!(record_id = %record.id, error = %e, "failed to compute next run");
                    record.fail_run(e.to_string());
                } else if record.repeat {
                    info!(
                        record_id = %record.id,
                        next_run = %record.next_run,
                        "scheduled build succeeded, rescheduled"
                    );
                } else {
                    info!(record_id = %record.id, "scheduled build succeeded");
                }
            }
            Err(e) => {
                warn!(record_id = %record.id, error = %e, "scheduled build failed");
                record.fail_run(e.to_string());
            }
        }

        if let Err(e) = store.save(record).await {
            error!(error = %e, "failed to persist schedule outcome");
        }
        // _guard drops here, releasing the active claim on every path.
    }
}
