//! Index Pipeline Daemon
//!
//! Two polling consumers that turn an uploaded container into a searchable
//! index: ingest cleans the container, provisioning creates the search
//! artifacts.
//!
//! # Usage
//!
//! ```bash
//! pipeline-daemon start [--db-path PATH] [--log-level LEVEL]
//! pipeline-daemon submit --project NAME --dir PATH [--definitions FILE]
//! pipeline-daemon job show|list|enqueue|structure
//! pipeline-daemon queue stats
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded in order (later sources override earlier):
//! 1. Built-in defaults
//! 2. Config file (~/.config/index-pipeline/config.toml)
//! 3. Environment variables (PIPELINE_*)
//! 4. CLI flags

use anyhow::Result;
use clap::Parser;

use pipeline_daemon::{
    handle_job, handle_queue, handle_submit, init_logging, load_settings, start_daemon, Cli,
    Commands,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(
        cli.config.as_deref(),
        cli.db_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&settings.log_level)?;

    match cli.command {
        Commands::Start => {
            start_daemon(settings).await?;
        }
        Commands::Submit {
            project,
            dir,
            definitions,
        } => {
            handle_submit(&settings, &project, &dir, definitions.as_deref()).await?;
        }
        Commands::Job { command } => {
            handle_job(&settings, command).await?;
        }
        Commands::Queue { command } => {
            handle_queue(&settings, command).await?;
        }
    }

    Ok(())
}
