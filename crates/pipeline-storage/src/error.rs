//! Storage layer error types.

use std::path::PathBuf;

use pipeline_types::JobId;
use thiserror::Error;

/// Errors that can occur in the storage layer
#[derive(Error, Debug)]
pub enum StorageError {
    /// RocksDB operation failed
    #[error("RocksDB error: {0}")]
    RocksDb(#[from] rocksdb::Error),

    /// Another handle holds the database open for writing
    #[error("Database at {0:?} is locked by another process")]
    Locked(PathBuf),

    /// Column family not found
    #[error("Column family not found: {0}")]
    ColumnFamilyNotFound(String),

    /// Key encoding/decoding error
    #[error("Key error: {0}")]
    Key(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Update or lookup against an id that has no record
    #[error("Record not found: job {0}")]
    JobNotFound(JobId),
}

impl StorageError {
    /// Whether this is the distinguishable "record not found" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::JobNotFound(_))
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

/// Errors from queue operations.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid queue name: {0}")]
    InvalidName(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    /// The receipt belongs to an expired lease; the message was re-leased
    #[error("Receipt does not match current lease of message {0}")]
    ReceiptMismatch(String),
}
