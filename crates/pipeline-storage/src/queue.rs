//! Durable leased queues backed by [`Storage`].
//!
//! A received message stays in the queue, invisible for the lease duration.
//! It is only removed by an explicit delete carrying the receipt of the
//! current lease; otherwise it reappears when the lease expires and its
//! delivery count grows on the next receive.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::db::Storage;
use crate::error::{QueueError, StorageError};
use crate::keys::validate_queue_name;

/// Persisted form of a queue message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueRecord {
    pub message_id: String,
    pub sequence: u64,
    pub text: String,
    pub inserted_at_ms: i64,
    /// Hidden from receivers until this time
    pub visible_at_ms: i64,
    pub delivery_count: u32,
    /// Receipt of the most recent lease
    #[serde(default)]
    pub receipt: Option<String>,
}

impl QueueRecord {
    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// A message handed out by [`MessageQueue::receive`].
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedMessage {
    pub message_id: String,
    pub text: String,
    /// Required to delete the message; valid only for this lease
    pub receipt: String,
    /// Deliveries so far, including this one
    pub delivery_count: u32,
    pub inserted_at: DateTime<Utc>,
}

impl From<QueueRecord> for ReceivedMessage {
    fn from(record: QueueRecord) -> Self {
        Self {
            inserted_at: Utc
                .timestamp_millis_opt(record.inserted_at_ms)
                .single()
                .unwrap_or_else(Utc::now),
            message_id: record.message_id,
            text: record.text,
            receipt: record.receipt.unwrap_or_default(),
            delivery_count: record.delivery_count,
        }
    }
}

/// A named queue with lease-based delivery.
#[async_trait]
pub trait MessageQueue: Send + Sync {
    /// Queue name
    fn name(&self) -> &str;

    /// Append a text message; returns its id.
    async fn send(&self, text: &str) -> Result<String, QueueError>;

    /// Lease at most one visible message for `lease`.
    async fn receive(&self, lease: Duration) -> Result<Option<ReceivedMessage>, QueueError>;

    /// Acknowledge a message with the receipt of its current lease.
    async fn delete(&self, message_id: &str, receipt: &str) -> Result<(), QueueError>;

    /// Number of messages held, leased or not.
    async fn approximate_len(&self) -> Result<u64, QueueError>;
}

/// [`MessageQueue`] over the shared RocksDB storage.
#[derive(Clone)]
pub struct StorageQueue {
    storage: Arc<Storage>,
    name: String,
}

impl StorageQueue {
    pub fn new(storage: Arc<Storage>, name: impl Into<String>) -> Result<Self, QueueError> {
        let name = name.into();
        validate_queue_name(&name)?;
        Ok(Self { storage, name })
    }
}

impl std::fmt::Debug for StorageQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageQueue")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl MessageQueue for StorageQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn send(&self, text: &str) -> Result<String, QueueError> {
        let record = self.storage.enqueue(&self.name, text)?;
        Ok(record.message_id)
    }

    async fn receive(&self, lease: Duration) -> Result<Option<ReceivedMessage>, QueueError> {
        let lease_ms = i64::try_from(lease.as_millis()).unwrap_or(i64::MAX / 2);
        let receipt = Ulid::new().to_string();
        let record = self.storage.lease_next(&self.name, lease_ms, receipt)?;
        Ok(record.map(ReceivedMessage::from))
    }

    async fn delete(&self, message_id: &str, receipt: &str) -> Result<(), QueueError> {
        self.storage.remove_message(&self.name, message_id, receipt)
    }

    async fn approximate_len(&self) -> Result<u64, QueueError> {
        Ok(self.storage.queue_len(&self.name)?)
    }
}
