//! Service run command.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::info;

use appforge_config::ServiceConfig;
use appforge_core::JobExecutor;
use appforge_core::schedule::ScheduleOptions;
use appforge_scheduler::BuildService;
use appforge_store::MemoryScheduleStore;

/// Executor used by the standalone service: logs the payload and simulates
/// a short build. The hosting process swaps in a real project generator.
struct LoggingExecutor;

#[async_trait]
impl JobExecutor for LoggingExecutor {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn execute(&self, payload: &serde_json::Value) -> appforge_core::Result<()> {
        info!(%payload, "building project");
        tokio::time::sleep(Duration::from_millis(250)).await;
        Ok(())
    }
}

/// Run the build scheduling service until Ctrl-C.
pub async fn run(config_path: &str, demo_in: Option<u64>) -> Result<()> {
    let config = if Path::new(config_path).exists() {
        appforge_config::load_config(config_path)
            .with_context(|| format!("failed to load config file: {}", config_path))?
    } else {
        info!(path = config_path, "config file not found, using defaults");
        ServiceConfig::default()
    };

    let store = Arc::new(MemoryScheduleStore::new());
    let service = BuildService::new(store, Arc::new(LoggingExecutor), &config);
    service.start().await;

    if let Some(seconds) = demo_in {
        let at = Utc::now() + chrono::Duration::seconds(seconds as i64);
        let record = service
            .schedule_job(
                "demo build",
                json!({"prompt": "a demo fullstack app"}),
                ScheduleOptions::once(at),
            )
            .await?;
        info!(record_id = %record.id, next_run = %record.next_run, "scheduled demo build");
    }

    info!("appforge service running, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    service.shutdown().await;
    Ok(())
}
