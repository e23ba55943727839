//! Service configuration parsing.

use std::path::Path;
use std::time::Duration;

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};

use crate::{ConfigError, ConfigResult};

/// Build queue configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of jobs dispatched per rolling minute.
    pub max_requests_per_minute: u32,
    /// Period of the queue processing tick, in milliseconds.
    pub tick_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_requests_per_minute: 5,
            tick_ms: 5_000,
        }
    }
}

impl QueueConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Scheduler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Period of the due-record poll, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 60_000,
        }
    }
}

impl SchedulerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Full service configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub queue: QueueConfig,
    pub scheduler: SchedulerConfig,
}

/// Parse a service configuration from KDL text.
///
/// Missing nodes and fields fall back to defaults; present fields must
/// be positive integers.
pub fn parse_config(kdl: &str) -> ConfigResult<ServiceConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut config = ServiceConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "queue" => parse_queue(node, &mut config.queue)?,
            "scheduler" => parse_scheduler(node, &mut config.scheduler)?,
            _ => {} // Ignore unknown nodes
        }
    }

    Ok(config)
}

/// Read and parse a configuration file.
pub fn load_config(path: impl AsRef<Path>) -> ConfigResult<ServiceConfig> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

fn parse_queue(node: &KdlNode, config: &mut QueueConfig) -> ConfigResult<()> {
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "max-requests-per-minute" => {
                    let value = get_positive_int(child, "max-requests-per-minute")?;
                    config.max_requests_per_minute = u32::try_from(value).map_err(|_| {
                        ConfigError::InvalidValue {
                            field: "max-requests-per-minute".to_string(),
                            message: format!("{value} is out of range"),
                        }
                    })?;
                }
                "tick-ms" => {
                    config.tick_ms = get_positive_int(child, "tick-ms")?;
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn parse_scheduler(node: &KdlNode, config: &mut SchedulerConfig) -> ConfigResult<()> {
    if let Some(children) = node.children() {
        for child in children.nodes() {
            if child.name().value() == "poll-interval-ms" {
                config.poll_interval_ms = get_positive_int(child, "poll-interval-ms")?;
            }
        }
    }
    Ok(())
}

fn get_positive_int(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = node
        .entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_integer())
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;

    u64::try_from(value)
        .ok()
        .filter(|v| *v > 0)
        .ok_or_else(|| ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a positive integer, got {value}"),
        })
}
