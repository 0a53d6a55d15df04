//! CLI argument parsing for the pipeline daemon.
//!
//! CLI flags override every other config source.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use pipeline_types::JobId;

/// Index Pipeline Daemon
///
/// Cleans uploaded containers and provisions search indexes for them.
#[derive(Parser, Debug)]
#[command(name = "pipeline-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to config file (overrides default ~/.config/index-pipeline/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Set log level (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    pub log_level: Option<String>,

    /// Override database path
    #[arg(long, global = true)]
    pub db_path: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Daemon commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run both consumers until interrupted
    Start,

    /// Upload a directory as a new project and queue it for ingest
    Submit {
        /// Project name, used to derive container and index names
        #[arg(short, long)]
        project: String,

        /// Directory whose files are uploaded
        #[arg(short, long)]
        dir: PathBuf,

        /// JSON file with datasource, index, skillset and indexer documents
        #[arg(long)]
        definitions: Option<PathBuf>,
    },

    /// Inspect and manage jobs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Inspect pipeline queues
    Queue {
        #[command(subcommand)]
        command: QueueCommands,
    },
}

/// Job subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum JobCommands {
    /// Print one job as JSON
    Show { id: JobId },

    /// Print all jobs as JSON
    List,

    /// Put an existing job back on the primary queue
    Enqueue { id: JobId },

    /// Build and cache the folder tree of a job's container
    Structure { id: JobId },
}

/// Queue subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum QueueCommands {
    /// Show approximate queue lengths
    Stats,
}
