//! Pipeline daemon library exports.
//!
//! # Modules
//!
//! - `cli`: Command-line argument parsing with clap
//! - `commands`: Command implementations (start, submit, job, queue)

pub mod cli;
pub mod commands;

pub use cli::{Cli, Commands, JobCommands, QueueCommands};
pub use commands::{
    build_consumers, cache_structure, handle_job, handle_queue, handle_submit, init_logging,
    load_settings, queue_names, start_daemon, submit_upload,
};
