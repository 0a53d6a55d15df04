//! Storage layer for the index provisioning pipeline.
//!
//! Provides RocksDB-backed storage with:
//! - Column family isolation for jobs, queue messages and counters
//! - Zero-padded sequence keys so prefix scans return FIFO order
//! - A [`JobStore`] implementation keyed by job id (last writer wins)
//! - Durable leased queues implementing [`MessageQueue`]

pub mod column_families;
pub mod db;
pub mod error;
pub mod jobs;
pub mod keys;
pub mod queue;

pub use db::{Storage, StorageStats};
pub use error::{QueueError, StorageError};
pub use jobs::JobStore;
pub use keys::{CounterKey, JobKey, QueueKey};
pub use queue::{MessageQueue, QueueRecord, ReceivedMessage, StorageQueue};
