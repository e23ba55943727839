//! Core domain types and traits for the AppForge build scheduler.
//!
//! This crate contains:
//! - Resource identifiers and common types
//! - Executor trait and job payload types
//! - Schedule records, priorities and recurrence rules

pub mod error;
pub mod executor;
pub mod id;
pub mod schedule;

pub use error::{Error, Result};
pub use executor::JobExecutor;
pub use id::ResourceId;
