//! Schedule store trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use appforge_core::ResourceId;
use appforge_core::schedule::ScheduleRecord;

use crate::StoreResult;

/// Persistence collaborator for schedule records.
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    /// Insert a new record. Fails with `Duplicate` if the id already exists.
    async fn insert(&self, record: ScheduleRecord) -> StoreResult<()>;

    /// Fetch a record by id. Fails with `NotFound` if absent.
    async fn get(&self, id: ResourceId) -> StoreResult<ScheduleRecord>;

    /// Persist an updated record. Fails with `NotFound` if absent.
    async fn save(&self, record: ScheduleRecord) -> StoreResult<()>;

    /// All records that are pending and due at `now`, ordered by `next_run`.
    async fn find_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleRecord>>;

    /// List every record, most recently created first.
    async fn list(&self) -> StoreResult<Vec<ScheduleRecord>>;
}
