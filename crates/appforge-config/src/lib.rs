//! KDL configuration parsing for the AppForge build scheduler.
//!
//! This crate handles parsing of the service configuration file
//! (appforge.kdl): queue throughput and tick settings and the scheduler
//! poll interval.

pub mod error;
pub mod service;

pub use error::{ConfigError, ConfigResult};
pub use service::{QueueConfig, SchedulerConfig, ServiceConfig, load_config, parse_config};
