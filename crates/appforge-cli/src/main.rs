//! AppForge CLI tool.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "appforge")]
#[command(about = "AppForge build scheduler", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the build scheduling service until interrupted
    Run {
        /// Path to the configuration file
        #[arg(long, env = "APPFORGE_CONFIG", default_value = "appforge.kdl")]
        config: String,
        /// Schedule a demo build this many seconds out on startup
        #[arg(long)]
        demo_in: Option<u64>,
    },
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "appforge.kdl")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, demo_in } => commands::run(&config, demo_in).await,
        Commands::Validate { path } => commands::validate(&path),
    }
}
