//! # pipeline-types
//!
//! Shared domain types for the index provisioning pipeline.
//!
//! This crate defines the data structures every other crate agrees on:
//! - Jobs: the persisted record tracking one upload-to-searchable-index workflow
//! - Job status: the monotonic state machine both consumers advance
//! - Definitions: the four opaque documents submitted to the search service
//! - Structure trees: cached folder/file snapshots of a container
//! - Settings: layered configuration for the daemon and consumers
//!
//! ## Usage
//!
//! ```rust
//! use pipeline_types::{JobStatus, NewJob};
//!
//! let job = NewJob::new("acme", "regena-acme-1234");
//! assert!(JobStatus::Created.can_advance_to(JobStatus::InProgress));
//! assert_eq!(job.container_ref, "regena-acme-1234");
//! ```

pub mod config;
pub mod error;
pub mod job;
pub mod naming;
pub mod structure;

pub use config::{
    CleanupSettings, ConsumerSettings, QueueSettings, SearchSettings, Settings, StorageSettings,
};
pub use error::PipelineError;
pub use job::{ArtifactKind, Job, JobDefinitions, JobId, JobStatus, JobUpdate, NewJob};
pub use naming::{container_name, index_name, sanitize_project_name};
pub use structure::{build_tree, NodeKind, TreeNode};
