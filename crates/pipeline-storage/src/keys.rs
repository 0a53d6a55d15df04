//! Key encoding and decoding for storage layer.
//!
//! Numeric components are zero-padded to 20 digits so that lexicographic
//! order equals numeric order and prefix scans come back in FIFO order.

use pipeline_types::JobId;

use crate::error::{QueueError, StorageError};

/// Key for job records
/// Format: job:{id:020}
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobKey {
    pub id: JobId,
}

impl JobKey {
    pub fn new(id: JobId) -> Self {
        Self { id }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("job:{:020}", self.id).into_bytes()
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let id = s
            .strip_prefix("job:")
            .ok_or_else(|| StorageError::Key(format!("Invalid job key format: {}", s)))?
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid job id: {}", e)))?;
        Ok(Self { id })
    }
}

/// Key for a message in a named queue
/// Format: q:{queue}:{sequence:020}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKey {
    pub queue: String,
    pub sequence: u64,
}

impl QueueKey {
    pub fn new(queue: impl Into<String>, sequence: u64) -> Self {
        Self {
            queue: queue.into(),
            sequence,
        }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("q:{}:{:020}", self.queue, self.sequence).into_bytes()
    }

    /// Prefix shared by every message of a queue.
    pub fn prefix(queue: &str) -> Vec<u8> {
        format!("q:{}:", queue).into_bytes()
    }

    /// Message ids are the zero-padded sequence.
    pub fn message_id(&self) -> String {
        format!("{:020}", self.sequence)
    }

    pub fn from_message_id(queue: &str, message_id: &str) -> Result<Self, QueueError> {
        let sequence = message_id
            .parse()
            .map_err(|_| QueueError::MessageNotFound(message_id.to_string()))?;
        Ok(Self::new(queue, sequence))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let parts: Vec<&str> = s.split(':').collect();
        if parts.len() != 3 || parts[0] != "q" {
            return Err(StorageError::Key(format!("Invalid queue key format: {}", s)));
        }
        let sequence = parts[2]
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid sequence: {}", e)))?;
        Ok(Self::new(parts[1], sequence))
    }
}

/// Key for a monotonic counter
/// Format: counter:{name}
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterKey {
    pub name: String,
}

impl CounterKey {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        format!("counter:{}", self.name).into_bytes()
    }
}

/// Queue names are limited to lowercase letters, digits and dashes.
pub fn validate_queue_name(name: &str) -> Result<(), QueueError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(QueueError::InvalidName(name.to_string()))
    }
}
