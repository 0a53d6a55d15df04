//! Stage 1: clean an uploaded container and hand the job to provisioning.
//!
//! Per message: decode, clean the container, move the job to
//! `IN_PROGRESS`, forward the reference to the secondary queue, then
//! acknowledge. The status write happens before the forward so stage 2
//! never sees a job that was not cleaned.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pipeline_storage::{JobStore, MessageQueue, ReceivedMessage, StorageError};
use pipeline_types::config::MIN_LEASE_SECS;
use pipeline_types::{JobStatus, JobUpdate};
use tracing::{debug, info, warn};

use crate::cleanup::ContainerCleaner;
use crate::codec::{self, JobReference};
use crate::consumer::{settle, Consumer, TickOutcome};
use crate::error::ConsumerError;
use crate::retry::{Disposition, FaultClass, RetryPolicy};

pub const INGEST_CONSUMER_NAME: &str = "ingest";

/// Polls the primary queue and cleans containers.
pub struct IngestConsumer {
    primary: Arc<dyn MessageQueue>,
    secondary: Arc<dyn MessageQueue>,
    jobs: Arc<dyn JobStore>,
    cleaner: Arc<ContainerCleaner>,
    policy: RetryPolicy,
    lease: Duration,
    dead_letter: Option<Arc<dyn MessageQueue>>,
}

impl IngestConsumer {
    pub fn new(
        primary: Arc<dyn MessageQueue>,
        secondary: Arc<dyn MessageQueue>,
        jobs: Arc<dyn JobStore>,
        cleaner: Arc<ContainerCleaner>,
    ) -> Self {
        Self {
            primary,
            secondary,
            jobs,
            cleaner,
            policy: RetryPolicy::default(),
            lease: Duration::from_secs(MIN_LEASE_SECS),
            dead_letter: None,
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn with_dead_letter(mut self, queue: Arc<dyn MessageQueue>) -> Self {
        self.dead_letter = Some(queue);
        self
    }

    /// Run the stage for one decoded message.
    async fn process(
        &self,
        reference: &JobReference,
        message: &ReceivedMessage,
    ) -> Result<Disposition, ConsumerError> {
        let container = reference.container().ok_or_else(|| {
            ConsumerError::Poison(format!(
                "job {} message has no container reference",
                reference.index_id
            ))
        })?;

        let job = self
            .jobs
            .find_by_id(reference.index_id)
            .await?
            .ok_or(StorageError::JobNotFound(reference.index_id))?;
        if job.status.is_terminal() {
            info!(
                job_id = job.id,
                status = %job.status,
                "Job already finished, not forwarding"
            );
            return Ok(Disposition::Complete);
        }

        self.cleaner.clean(container).await?;

        if job.status.has_reached(JobStatus::InProgress) {
            debug!(job_id = job.id, "Job already in progress, skipping status write");
        } else {
            self.jobs
                .update(job.id, JobUpdate::status(JobStatus::InProgress))
                .await?;
            info!(job_id = job.id, container = %container, "Job moved to IN_PROGRESS");
        }

        let forwarded = self.secondary.send(&message.text).await?;
        debug!(
            job_id = job.id,
            queue = %self.secondary.name(),
            message_id = %forwarded,
            "Forwarded job reference"
        );
        Ok(Disposition::Complete)
    }
}

#[async_trait]
impl Consumer for IngestConsumer {
    fn name(&self) -> &str {
        INGEST_CONSUMER_NAME
    }

    fn queue_name(&self) -> &str {
        self.primary.name()
    }

    async fn tick(&self) -> Result<TickOutcome, ConsumerError> {
        let Some(message) = self.primary.receive(self.lease).await? else {
            debug!(queue = %self.primary.name(), "No messages");
            return Ok(TickOutcome::Idle);
        };
        debug!(
            message_id = %message.message_id,
            delivery_count = message.delivery_count,
            "Received message"
        );

        let result = match codec::decode(&message.text) {
            Ok(reference) => self.process(&reference, &message).await,
            Err(e) => Err(e.into()),
        };
        let disposition = match result {
            Ok(disposition) => disposition,
            Err(e) => {
                if e.fault_class() != FaultClass::Poison {
                    warn!(message_id = %message.message_id, error = %e, "Ingest failed");
                }
                self.policy
                    .decide(e.fault_class(), message.delivery_count, e.to_string())
            }
        };

        settle(
            INGEST_CONSUMER_NAME,
            self.primary.as_ref(),
            self.dead_letter.as_ref(),
            &message,
            &disposition,
        )
        .await?;

        Ok(TickOutcome::Handled {
            message_id: message.message_id,
            disposition,
        })
    }
}
