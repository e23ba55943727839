//! CLI command implementations.

mod run;

use anyhow::Result;

pub use run::run;

pub fn validate(path: &str) -> Result<()> {
    match appforge_config::load_config(path) {
        Ok(config) => {
            println!("Configuration is valid");
            println!(
                "  queue: {} requests/minute, tick every {}ms",
                config.queue.max_requests_per_minute, config.queue.tick_ms
            );
            println!("  scheduler: poll every {}ms", config.scheduler.poll_interval_ms);
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}
