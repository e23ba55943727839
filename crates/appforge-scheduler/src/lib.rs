//! Build queue and polling scheduler for AppForge.
//!
//! Two cooperating components drive deferred build jobs:
//! - [`JobQueue`] serializes execution against the external executor,
//!   honoring priority ordering and a rolling-minute rate limit.
//! - [`Scheduler`] polls the schedule store for due records, dispatches
//!   them, and reschedules recurring records after success.
//!
//! [`BuildService`] wires both together behind the public operations.

pub mod queue;
pub mod registry;
pub mod scheduler;
pub mod service;

pub use queue::{
    EnqueueOutcome, EnqueueStatus, JobQueue, QueuePriority, QueueStatusSnapshot, TickOutcome,
};
pub use registry::ActiveJobs;
pub use scheduler::Scheduler;
pub use service::{BuildService, QueueBuildOptions};
