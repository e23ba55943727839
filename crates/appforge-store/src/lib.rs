//! Schedule persistence for the AppForge build scheduler.
//!
//! The scheduler and queue talk to storage exclusively through the
//! [`ScheduleStore`] trait. The in-memory implementation backs tests and
//! single-process deployments; a database-backed implementation can be
//! swapped in without touching the core.

pub mod error;
pub mod memory;
pub mod store;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryScheduleStore;
pub use store::ScheduleStore;
