//! Process-local registry of in-flight executions.
//!
//! The registry is the only synchronization point between poll ticks: a
//! record that is already executing must not be dispatched again by a
//! later tick. Entries are removed on every exit path via an RAII guard.
//! The registry is transient; it starts empty on process restart.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};

use appforge_core::ResourceId;

/// An in-flight execution entry.
#[derive(Debug, Clone)]
pub struct ActiveJob {
    pub started_at: DateTime<Utc>,
}

/// Registry of records currently being executed.
#[derive(Debug, Default)]
pub struct ActiveJobs {
    inner: Mutex<HashMap<ResourceId, ActiveJob>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `id` for execution.
    ///
    /// Returns `None` if the record is already being executed. The returned
    /// guard releases the claim when dropped, whichever way the execution
    /// path exits.
    pub fn begin(self: &Arc<Self>, id: ResourceId) -> Option<ActiveJobGuard> {
        let mut map = self.lock();
        if map.contains_key(&id) {
            return None;
        }
        map.insert(
            id,
            ActiveJob {
                started_at: Utc::now(),
            },
        );
        Some(ActiveJobGuard {
            registry: Arc::clone(self),
            id,
        })
    }

    /// Whether `id` is currently claimed.
    pub fn contains(&self, id: ResourceId) -> bool {
        self.lock().contains_key(&id)
    }

    /// Number of in-flight executions.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ResourceId, ActiveJob>> {
        // The map is only touched in short critical sections; recover the
        // data if a holder panicked.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Claim on a record in [`ActiveJobs`]; releases on drop.
pub struct ActiveJobGuard {
    registry: Arc<ActiveJobs>,
    id: ResourceId,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_on_same_id_is_refused() {
        let registry = Arc::new(ActiveJobs::new());
        let id = ResourceId::new();

        let guard = registry.begin(id);
        assert!(guard.is_some());
        assert!(registry.begin(id).is_none());
        assert!(registry.contains(id));
    }

    #[test]
    fn dropping_the_guard_releases_the_claim() {
        let registry = Arc::new(ActiveJobs::new());
        let id = ResourceId::new();

        let guard = registry.begin(id);
        drop(guard);

        assert!(!registry.contains(id));
        assert!(registry.begin(id).is_some());
    }

    #[test]
    fn distinct_ids_are_independent() {
        let registry = Arc::new(ActiveJobs::new());
        let _a = registry.begin(ResourceId::new());
        let _b = registry.begin(ResourceId::new());
        assert_eq!(registry.len(), 2);
    }
}
