//! In-memory schedule store.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use appforge_core::ResourceId;
use appforge_core::schedule::ScheduleRecord;

use crate::store::ScheduleStore;
use crate::{StoreError, StoreResult};

/// In-memory implementation of [`ScheduleStore`].
///
/// State is lost on restart; records that were mid-flight simply become
/// re-eligible once re-created as pending.
#[derive(Default)]
pub struct MemoryScheduleStore {
    records: RwLock<HashMap<ResourceId, ScheduleRecord>>,
}

impl MemoryScheduleStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleStore for MemoryScheduleStore {
    async fn insert(&self, record: ScheduleRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        if records.contains_key(&record.id) {
            return Err(StoreError::Duplicate(record.id.to_string()));
        }
        records.insert(record.id, record);
        Ok(())
    }

    async fn get(&self, id: ResourceId) -> StoreResult<ScheduleRecord> {
        let records = self.records.read().await;
        records
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn save(&self, record: ScheduleRecord) -> StoreResult<()> {
        let mut records = self.records.write().await;
        match records.get_mut(&record.id) {
            Some(slot) => {
                *slot = record;
                Ok(())
            }
            None => Err(StoreError::NotFound(record.id.to_string())),
        }
    }

    async fn find_due(&self, now: DateTime<Utc>) -> StoreResult<Vec<ScheduleRecord>> {
        let records = self.records.read().await;
        let mut due: Vec<ScheduleRecord> = records
            .values()
            .filter(|r| r.is_due(now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.next_run);
        Ok(due)
    }

    async fn list(&self) -> StoreResult<Vec<ScheduleRecord>> {
        let records = self.records.read().await;
        let mut all: Vec<ScheduleRecord> = records.values().cloned().collect();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(all)
    }
}
