//! Error types for the consumers crate.

use pipeline_blob::ObjectStoreError;
use pipeline_search::{IndexingError, IndexingErrorKind};
use pipeline_storage::{QueueError, StorageError};
use pipeline_types::JobId;
use thiserror::Error;

use crate::codec::CodecError;
use crate::ignore::IgnoreParseError;
use crate::retry::FaultClass;

/// Errors raised while handling a queue message.
#[derive(Debug, Error)]
pub enum ConsumerError {
    /// Message or job state that can never be processed
    #[error("Poison message: {0}")]
    Poison(String),

    /// Job has not reached the state this stage expects yet
    #[error("Job {0} is not ready for provisioning")]
    NotReady(JobId),

    #[error("Invalid message: {0}")]
    Codec(#[from] CodecError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Job store error: {0}")]
    Storage(#[from] StorageError),

    #[error("Object store error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("Indexing error: {0}")]
    Indexing(#[from] IndexingError),

    #[error("Invalid ignore rules: {0}")]
    Rules(#[from] IgnoreParseError),
}

impl ConsumerError {
    /// Classification used by the retry policy.
    pub fn fault_class(&self) -> FaultClass {
        match self {
            ConsumerError::Poison(_) | ConsumerError::Codec(_) | ConsumerError::Rules(_) => {
                FaultClass::Poison
            }
            ConsumerError::NotReady(_) => FaultClass::Transient,
            ConsumerError::Storage(e) if e.is_not_found() => FaultClass::Poison,
            ConsumerError::ObjectStore(ObjectStoreError::InvalidContainerName(_)) => {
                FaultClass::Poison
            }
            // A new container may not be listable yet
            ConsumerError::ObjectStore(ObjectStoreError::ContainerNotFound(_)) => {
                FaultClass::Transient
            }
            ConsumerError::Indexing(e) => match e.kind() {
                IndexingErrorKind::RateLimited => FaultClass::Transient,
                IndexingErrorKind::NotFound => FaultClass::Permanent,
                IndexingErrorKind::Invalid | IndexingErrorKind::Unknown => {
                    FaultClass::Unclassified
                }
            },
            ConsumerError::Queue(_) | ConsumerError::Storage(_) | ConsumerError::ObjectStore(_) => {
                FaultClass::Unclassified
            }
        }
    }
}
