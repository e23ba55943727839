//! Executor trait and job payload types.
//!
//! Executors run build jobs. The queue and scheduler never interpret the
//! payload; it is handed to the executor as-is.

use async_trait::async_trait;

use crate::Result;

/// Trait for build job executors.
///
/// Implementations perform the actual work of a build job (project
/// generation, file scaffolding, whatever the hosting process wires in).
/// A failure is reported as [`crate::Error::ExecutionFailed`] and is terminal
/// for that attempt; neither the queue nor the scheduler retries.
#[async_trait]
pub trait JobExecutor: Send + Sync {
    /// Name of this executor.
    fn name(&self) -> &'static str;

    /// Execute a job with the given payload.
    async fn execute(&self, payload: &serde_json::Value) -> Result<()>;
}
