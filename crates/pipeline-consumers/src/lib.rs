//! Consumers for the index provisioning pipeline.
//!
//! Two stages, each polling its own queue on a fixed interval:
//! - [`IngestConsumer`]: cleans the uploaded container with ignore rules,
//!   moves the job to `IN_PROGRESS` and forwards it
//! - [`ProvisionConsumer`]: submits the four search artifacts in order and
//!   moves the job to `SUCCESS`
//!
//! Both share the message [`codec`], the [`RetryPolicy`] and the
//! settle step in [`consumer`] that acknowledges, dead-letters or leaves a
//! message for redelivery.

pub mod cleanup;
pub mod codec;
pub mod consumer;
pub mod error;
pub mod ignore;
pub mod ingest;
pub mod provision;
pub mod registry;
pub mod retry;
pub mod worker;

pub use cleanup::{CleanupReport, ContainerCleaner, RuleSource};
pub use codec::{decode, encode, CodecError, JobReference};
pub use consumer::{Consumer, TickOutcome};
pub use error::ConsumerError;
pub use ignore::{IgnoreParseError, IgnoreRules};
pub use ingest::{IngestConsumer, INGEST_CONSUMER_NAME};
pub use provision::{ProvisionConsumer, PROVISION_CONSUMER_NAME};
pub use registry::{LastOutcome, WorkerRegistry, WorkerStatus};
pub use retry::{Disposition, FaultClass, RetryPolicy};
pub use worker::PollingWorker;
