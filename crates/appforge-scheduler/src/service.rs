//! Public facade over the queue and scheduler.
//!
//! A [`BuildService`] is constructed explicitly by the hosting process and
//! injected where needed; there is no ambient global instance.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use appforge_config::ServiceConfig;
use appforge_core::schedule::{ScheduleOptions, ScheduleRecord, ScheduleStatus};
use appforge_core::{Error, JobExecutor, ResourceId, Result};
use appforge_store::ScheduleStore;

use crate::queue::{EnqueueOutcome, JobQueue, QueuePriority, QueueStatusSnapshot};
use crate::scheduler::Scheduler;

/// Options for queueing an immediate build.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueBuildOptions {
    #[serde(default)]
    pub priority: QueuePriority,
    /// Re-arm a completed, failed or cancelled record before queueing.
    #[serde(default)]
    pub force: bool,
}

/// The build scheduling service: schedule store, build queue and polling
/// scheduler wired together behind the operations the hosting layer calls.
pub struct BuildService {
    store: Arc<dyn ScheduleStore>,
    queue: Arc<JobQueue>,
    scheduler: Arc<Scheduler>,
}

impl BuildService {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        executor: Arc<dyn JobExecutor>,
        config: &ServiceConfig,
    ) -> Self {
        let queue = Arc::new(JobQueue::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            &config.queue,
        ));
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            executor,
            &config.scheduler,
        ));
        Self {
            store,
            queue,
            scheduler,
        }
    }

    /// Start the queue tick loop and the scheduler poll loop. Idempotent.
    pub async fn start(&self) {
        self.queue.start().await;
        self.scheduler.start().await;
    }

    /// Stop both loops. In-flight executions are not interrupted. Idempotent.
    pub async fn stop(&self) {
        self.scheduler.stop().await;
        self.queue.stop().await;
    }

    /// Stop both loops and wait for in-flight scheduled executions.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.scheduler.drain().await;
    }

    /// Create a new pending schedule record.
    pub async fn schedule_job(
        &self,
        title: impl Into<String>,
        payload: serde_json::Value,
        options: ScheduleOptions,
    ) -> Result<ScheduleRecord> {
        let record = ScheduleRecord::new(title, payload, options)?;
        self.store
            .insert(record.clone())
            .await
            .map_err(Error::from)?;
        info!(
            record_id = %record.id,
            title = %record.title,
            next_run = %record.next_run,
            repeat = record.repeat,
            "scheduled build job"
        );
        Ok(record)
    }

    /// Cancel a schedule.
    ///
    /// Fails with `InvalidState` while the record is processing; otherwise
    /// the record is cancelled and any queued-but-undispatched entry is
    /// removed from the build queue.
    pub async fn cancel_schedule(&self, id: ResourceId) -> Result<ScheduleRecord> {
        let mut record = self.store.get(id).await.map_err(Error::from)?;
        record.cancel()?;
        self.store.save(record.clone()).await.map_err(Error::from)?;
        self.queue.remove(id).await;
        info!(record_id = %id, "cancelled schedule");
        Ok(record)
    }

    /// Queue an immediate build of an existing schedule record.
    pub async fn queue_build_now(
        &self,
        id: ResourceId,
        options: QueueBuildOptions,
    ) -> Result<EnqueueOutcome> {
        let mut record = self.store.get(id).await.map_err(Error::from)?;

        if record.status == ScheduleStatus::Processing {
            return Err(Error::InvalidState(format!(
                "record {id} is currently processing"
            )));
        }
        if record.status.is_terminal() {
            if !options.force {
                return Err(Error::InvalidState(format!(
                    "record {id} is {}; pass force to re-queue it",
                    record.status
                )));
            }
            record.rearm(Utc::now());
            self.store.save(record.clone()).await.map_err(Error::from)?;
        }

        self.queue
            .enqueue(id, record.payload.clone(), options.priority)
            .await
    }

    /// Read-only snapshot of the build queue.
    pub async fn queue_status(&self) -> QueueStatusSnapshot {
        self.queue.queue_status().await
    }

    pub async fn get_schedule(&self, id: ResourceId) -> Result<ScheduleRecord> {
        self.store.get(id).await.map_err(Error::from)
    }

    pub async fn list_schedules(&self) -> Result<Vec<ScheduleRecord>> {
        self.store.list().await.map_err(Error::from)
    }

    /// Change the queue's rolling-minute dispatch limit at runtime.
    pub async fn set_max_requests_per_minute(&self, limit: u32) -> Result<()> {
        self.queue.set_max_requests_per_minute(limit).await
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{EnqueueStatus, TickOutcome};
    use appforge_core::schedule::RepeatFrequency;
    use appforge_store::MemoryScheduleStore;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct OkExecutor;

    #[async_trait]
    impl JobExecutor for OkExecutor {
        fn name(&self) -> &'static str {
            "ok"
        }

        async fn execute(&self, _payload: &serde_json::Value) -> Result<()> {
            Ok(())
        }
    }

    struct CountingExecutor {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl JobExecutor for CountingExecutor {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn execute(&self, _payload: &serde_json::Value) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn service() -> (Arc<MemoryScheduleStore>, BuildService) {
        let store = Arc::new(MemoryScheduleStore::new());
        let service = BuildService::new(
            store.clone(),
            Arc::new(OkExecutor),
            &ServiceConfig::default(),
        );
        (store, service)
    }

    #[tokio::test]
    async fn schedule_job_creates_a_pending_record() {
        let (store, service) = service();
        let at = Utc::now() + ChronoDuration::hours(1);

        let record = service
            .schedule_job("my blog", json!({"prompt": "a blog"}), ScheduleOptions::once(at))
            .await
            .unwrap();

        assert_eq!(record.status, ScheduleStatus::Pending);
        assert_eq!(record.next_run, at);
        assert_eq!(store.get(record.id).await.unwrap().title, "my blog");
    }

    #[tokio::test]
    async fn schedule_job_rejects_repeat_without_frequency() {
        let (_store, service) = service();
        let mut options = ScheduleOptions::once(Utc::now());
        options.repeat = true;

        let err = service
            .schedule_job("bad", json!({}), options)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[tokio::test]
    async fn cancel_pending_schedule_removes_queued_entry() {
        let (_store, service) = service();
        let record = service
            .schedule_job(
                "cancel me",
                json!({}),
                ScheduleOptions::once(Utc::now() + ChronoDuration::hours(1)),
            )
            .await
            .unwrap();
        service
            .queue_build_now(record.id, QueueBuildOptions::default())
            .await
            .unwrap();

        let cancelled = service.cancel_schedule(record.id).await.unwrap();

        assert_eq!(cancelled.status, ScheduleStatus::Cancelled);
        assert_eq!(service.queue_status().await.queue_length, 0);
    }

    #[tokio::test]
    async fn cancel_processing_schedule_is_rejected_without_mutation() {
        let (store, service) = service();
        let record = service
            .schedule_job("busy", json!({}), ScheduleOptions::once(Utc::now()))
            .await
            .unwrap();
        let mut processing = store.get(record.id).await.unwrap();
        processing.begin_processing().unwrap();
        store.save(processing).await.unwrap();

        let err = service.cancel_schedule(record.id).await.unwrap_err();

        assert!(matches!(err, Error::InvalidState(_)));
        assert_eq!(
            store.get(record.id).await.unwrap().status,
            ScheduleStatus::Processing
        );
    }

    #[tokio::test]
    async fn cancel_unknown_schedule_is_not_found() {
        let (_store, service) = service();
        assert!(matches!(
            service.cancel_schedule(ResourceId::new()).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn queue_build_now_then_tick_completes_the_record() {
        let (store, service) = service();
        let record = service
            .schedule_job(
                "build now",
                json!({"prompt": "an api"}),
                ScheduleOptions::once(Utc::now() + ChronoDuration::hours(2)),
            )
            .await
            .unwrap();

        let outcome = service
            .queue_build_now(record.id, QueueBuildOptions::default())
            .await
            .unwrap();
        assert_eq!(outcome.status, EnqueueStatus::Queued);
        assert_eq!(outcome.position, 1);

        assert_eq!(
            service.queue().process_tick().await,
            TickOutcome::Processed { success: true }
        );
        assert_eq!(
            store.get(record.id).await.unwrap().status,
            ScheduleStatus::Completed
        );
    }

    #[tokio::test]
    async fn due_record_queued_for_immediate_build_runs_exactly_once() {
        let store = Arc::new(MemoryScheduleStore::new());
        let executor = Arc::new(CountingExecutor {
            calls: AtomicUsize::new(0),
        });
        let service = BuildService::new(
            store.clone(),
            executor.clone(),
            &ServiceConfig::default(),
        );

        let overdue = Utc::now() - ChronoDuration::minutes(1);
        let record = service
            .schedule_job("overdue", json!({}), ScheduleOptions::once(overdue))
            .await
            .unwrap();

        service
            .queue_build_now(record.id, QueueBuildOptions::default())
            .await
            .unwrap();

        // The due poll must not pick the record up while it sits on the
        // build queue.
        service.scheduler().check_due(Utc::now()).await;
        service.scheduler().drain().await;

        assert_eq!(
            service.queue().process_tick().await,
            TickOutcome::Processed { success: true }
        );
        assert_eq!(executor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            store.get(record.id).await.unwrap().status,
            ScheduleStatus::Completed
        );
    }

    #[tokio::test]
    async fn queue_build_now_on_terminal_record_requires_force() {
        let (store, service) = service();
        let record = service
            .schedule_job("done", json!({}), ScheduleOptions::once(Utc::now()))
            .await
            .unwrap();
        let mut completed = store.get(record.id).await.unwrap();
        completed.begin_processing().unwrap();
        completed.complete_run(Utc::now()).unwrap();
        store.save(completed).await.unwrap();

        let err = service
            .queue_build_now(record.id, QueueBuildOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidState(_)));

        let outcome = service
            .queue_build_now(
                record.id,
                QueueBuildOptions {
                    force: true,
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, EnqueueStatus::Queued);
        assert_eq!(
            store.get(record.id).await.unwrap().status,
            ScheduleStatus::Pending
        );
    }

    #[tokio::test]
    async fn queue_build_now_while_processing_is_rejected() {
        let (store, service) = service();
        let record = service
            .schedule_job("busy", json!({}), ScheduleOptions::once(Utc::now()))
            .await
            .unwrap();
        let mut processing = store.get(record.id).await.unwrap();
        processing.begin_processing().unwrap();
        store.save(processing).await.unwrap();

        assert!(matches!(
            service
                .queue_build_now(record.id, QueueBuildOptions::default())
                .await,
            Err(Error::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn recurring_schedule_survives_a_build_and_stays_listed() {
        let (store, service) = service();
        let overdue = Utc::now() - ChronoDuration::minutes(1);
        let record = service
            .schedule_job(
                "nightly",
                json!({"prompt": "regenerate"}),
                ScheduleOptions::recurring(overdue, RepeatFrequency::Daily, 1),
            )
            .await
            .unwrap();

        service.scheduler().check_due(Utc::now()).await;
        service.scheduler().drain().await;

        let after = store.get(record.id).await.unwrap();
        assert_eq!(after.status, ScheduleStatus::Pending);
        assert!(after.next_run > Utc::now());
        assert_eq!(service.list_schedules().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn lifecycle_start_stop_are_idempotent() {
        let (_store, service) = service();
        service.start().await;
        service.start().await;
        service.stop().await;
        service.shutdown().await;
    }
}
