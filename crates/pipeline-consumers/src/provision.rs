//! Stage 2: provision the search artifacts for a cleaned job.
//!
//! Submits datasource, index, skillset and indexer strictly in that order,
//! then moves the job to `SUCCESS`. A job that is already `SUCCESS` is
//! acknowledged without touching the search service, so redelivery after a
//! lost acknowledgement is harmless.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pipeline_search::{IndexingGateway, SubmitOutcome};
use pipeline_storage::{JobStore, MessageQueue, StorageError};
use pipeline_types::config::MIN_LEASE_SECS;
use pipeline_types::{JobId, JobStatus, JobUpdate};
use tracing::{debug, info, warn};

use crate::codec::{self, JobReference};
use crate::consumer::{settle, Consumer, TickOutcome};
use crate::error::ConsumerError;
use crate::retry::{Disposition, FaultClass, RetryPolicy};

pub const PROVISION_CONSUMER_NAME: &str = "provision";

/// Polls the secondary queue and provisions search artifacts.
pub struct ProvisionConsumer {
    queue: Arc<dyn MessageQueue>,
    jobs: Arc<dyn JobStore>,
    gateway: Arc<dyn IndexingGateway>,
    policy: RetryPolicy,
    lease: Duration,
    dead_letter: Option<Arc<dyn MessageQueue>>,
    mark_failed_on_discard: bool,
}

impl ProvisionConsumer {
    pub fn new(
        queue: Arc<dyn MessageQueue>,
        jobs: Arc<dyn JobStore>,
        gateway: Arc<dyn IndexingGateway>,
    ) -> Self {
        Self {
            queue,
            jobs,
            gateway,
            policy: RetryPolicy::default(),
            lease: Duration::from_secs(MIN_LEASE_SECS),
            dead_letter: None,
            mark_failed_on_discard: true,
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

    pub fn with_mark_failed_on_discard(mut self, enabled: bool) -> Self {
        self.mark_failed_on_discard = enabled;
        self
    }

    async fn process(&self, reference: &JobReference) -> Result<Disposition, ConsumerError> {
        let job = self
            .jobs
            .find_by_id(reference.index_id)
            .await?
            .ok_or(StorageError::JobNotFound(reference.index_id))?;

        match job.status {
            JobStatus::Success => {
                info!(job_id = job.id, "Job already provisioned, acknowledging");
                return Ok(Disposition::Complete);
            }
            JobStatus::Failed => {
                return Err(ConsumerError::Poison(format!("job {} is FAILED", job.id)));
            }
            JobStatus::Created => return Err(ConsumerError::NotReady(job.id)),
            JobStatus::InProgress => {}
        }

        let Some(artifacts) = job.definitions.in_submission_order() else {
            let missing: Vec<String> = job
                .definitions
                .missing()
                .iter()
                .map(ToString::to_string)
                .collect();
            return Err(ConsumerError::Poison(format!(
                "job {} is missing definitions: {}",
                job.id,
                missing.join(", ")
            )));
        };

        for (kind, definition) in artifacts {
            match self.gateway.submit(kind, definition).await? {
                SubmitOutcome::Created => {
                    debug!(job_id = job.id, artifact = %kind, "Artifact created");
                }
                SubmitOutcome::AlreadyExists => {
                    info!(job_id = job.id, artifact = %kind, "Artifact already exists");
                }
            }
        }

        self.jobs
            .update(job.id, JobUpdate::status(JobStatus::Success))
            .await?;
        info!(job_id = job.id, name = %job.name, "Job moved to SUCCESS");
        Ok(Disposition::Complete)
    }

    /// Record a discarded job as FAILED. Terminal jobs are left alone.
    async fn mark_failed(&self, id: JobId) {
        let job = match self.jobs.find_by_id(id).await {
            Ok(Some(job)) => job,
            Ok(None) => return,
            Err(e) => {
                warn!(job_id = id, error = %e, "Could not load job to mark FAILED");
                return;
            }
        };
        if job.status.is_terminal() {
            return;
        }
        match self
            .jobs
            .update(id, JobUpdate::status(JobStatus::Failed))
            .await
        {
            Ok(_) => info!(job_id = id, "Job moved to FAILED"),
            Err(e) => warn!(job_id = id, error = %e, "Could not mark job FAILED"),
        }
    }
}

#[async_trait]
impl Consumer for ProvisionConsumer {
    fn name(&self) -> &str {
        PROVISION_CONSUMER_NAME
    }

    fn queue_name(&self) -> &str {
        self.queue.name()
    }

    async fn tick(&self) -> Result<TickOutcome, ConsumerError> {
        let Some(message) = self.queue.receive(self.lease).await? else {
            debug!(queue = %self.queue.name(), "No messages");
            return Ok(TickOutcome::Idle);
        };
        debug!(
            message_id = %message.message_id,
            delivery_count = message.delivery_count,
            "Received message"
        );

        let (job_id, result) = match codec::decode(&message.text) {
            Ok(reference) => (Some(reference.index_id), self.process(&reference).await),
            Err(e) => (None, Err(e.into())),
        };
        let disposition = match result {
            Ok(disposition) => disposition,
            Err(e) => {
                if e.fault_class() != FaultClass::Poison {
                    warn!(message_id = %message.message_id, error = %e, "Provisioning failed");
                }
                self.policy
                    .decide(e.fault_class(), message.delivery_count, e.to_string())
            }
        };

        if let (Disposition::Discard { .. }, Some(id), true) =
            (&disposition, job_id, self.mark_failed_on_discard)
        {
            self.mark_failed(id).await;
        }

        settle(
            PROVISION_CONSUMER_NAME,
            self.queue.as_ref(),
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use pipeline_search::{IndexingErrorKind, MockIndexingGateway};
    use pipeline_storage::{Storage, StorageQueue};
    use pipeline_types::{ArtifactKind, JobDefinitions, NewJob};
    use serde_json::json;
    use tempfile::TempDir;

    struct Fixture {
        consumer: ProvisionConsumer,
        queue: Arc<dyn MessageQueue>,
        storage: Arc<Storage>,
        gateway: Arc<MockIndexingGateway>,
        _temp: TempDir,
    }

    fn fixture(policy: RetryPolicy) -> Fixture {
        let temp = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp.path()).unwrap());
        let queue: Arc<dyn MessageQueue> =
            Arc::new(StorageQueue::new(storage.clone(), "finished-uploads-test").unwrap());
        let gateway = Arc::new(MockIndexingGateway::new());
        let consumer = ProvisionConsumer::new(queue.clone(), storage.clone(), gateway.clone())
            .with_policy(policy)
            .with_lease(Duration::ZERO);
        Fixture {
            consumer,
            queue,
            storage,
            gateway,
            _temp: temp,
        }
    }

    fn definitions() -> JobDefinitions {
        JobDefinitions {
            datasource: Some(json!({"name": "ds"})),
            index: Some(json!({"name": "idx"})),
            skillset: Some(json!({"name": "sk"})),
            indexer: Some(json!({"name": "ixr"})),
        }
    }

    async fn seed(f: &Fixture, defs: JobDefinitions, status: JobStatus) -> JobId {
        let job = f
            .storage
            .create(NewJob::new("index-acme", "c1").with_definitions(defs))
            .await
            .unwrap();
        if status != JobStatus::Created {
            f.storage
                .update(job.id, JobUpdate::status(status))
                .await
                .unwrap();
        }
        f.queue
            .send(&encode(&JobReference::new(job.id).with_blob_name("c1")).unwrap())
            .await
            .unwrap();
        job.id
    }

    async fn status(f: &Fixture, id: JobId) -> JobStatus {
        f.storage.find_by_id(id).await.unwrap().unwrap().status
    }

    fn is_discard(outcome: &TickOutcome) -> bool {
        matches!(
            outcome,
            TickOutcome::Handled {
                disposition: Disposition::Discard { .. },
                ..
            }
        )
    }

    fn is_retry(outcome: &TickOutcome) -> bool {
        matches!(
            outcome,
            TickOutcome::Handled {
                disposition: Disposition::Retry { .. },
                ..
            }
        )
    }

    #[tokio::test]
    async fn test_submits_in_order_then_success() {
        let f = fixture(RetryPolicy::default());
        let id = seed(&f, definitions(), JobStatus::InProgress).await;

        let outcome = f.consumer.tick().await.unwrap();
        assert!(matches!(
            outcome,
            TickOutcome::Handled {
                disposition: Disposition::Complete,
                ..
            }
        ));
        assert_eq!(
            f.gateway.submitted_kinds(),
            ArtifactKind::SUBMISSION_ORDER.to_vec()
        );
        assert_eq!(f.gateway.submissions()[1].definition, json!({"name": "idx"}));
        assert_eq!(status(&f, id).await, JobStatus::Success);
        assert_eq!(f.queue.approximate_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_definition_makes_no_calls() {
        let f = fixture(RetryPolicy::default());
        let mut defs = definitions();
        defs.skillset = None;
        let id = seed(&f, defs, JobStatus::InProgress).await;

        let outcome = f.consumer.tick().await.unwrap();
        assert!(is_discard(&outcome));
        assert_eq!(f.gateway.call_count(), 0);
        assert_eq!(status(&f, id).await, JobStatus::Failed);
        assert_eq!(f.queue.approximate_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_missing_definition_leaves_status_when_marking_disabled() {
        let mut f = fixture(RetryPolicy::default());
        f.consumer = f.consumer.with_mark_failed_on_discard(false);
        let mut defs = definitions();
        defs.indexer = None;
        let id = seed(&f, defs, JobStatus::InProgress).await;

        f.consumer.tick().await.unwrap();
        assert_eq!(status(&f, id).await, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn test_rate_limit_retries_then_succeeds() {
        let f = fixture(RetryPolicy::default());
        let id = seed(&f, definitions(), JobStatus::InProgress).await;
        f.gateway
            .fail_once(ArtifactKind::Skillset, IndexingErrorKind::RateLimited);

        let first = f.consumer.tick().await.unwrap();
        assert!(is_retry(&first));
        assert_eq!(status(&f, id).await, JobStatus::InProgress);
        assert_eq!(f.queue.approximate_len().await.unwrap(), 1);

        let second = f.consumer.tick().await.unwrap();
        assert!(!is_retry(&second));
        assert_eq!(status(&f, id).await, JobStatus::Success);
        // datasource, index, skillset (failed), then all four again
        assert_eq!(f.gateway.call_count(), 7);
    }

    #[tokio::test]
    async fn test_rate_limit_exhaustion_discards() {
        let f = fixture(RetryPolicy {
            max_deliveries: 10,
            cap_unclassified: false,
        });
        let id = seed(&f, definitions(), JobStatus::InProgress).await;
        f.gateway
            .fail_always(ArtifactKind::Index, IndexingErrorKind::RateLimited);

        for _ in 0..9 {
            assert!(is_retry(&f.consumer.tick().await.unwrap()));
        }
        let last = f.consumer.tick().await.unwrap();
        assert!(is_discard(&last));
        assert_eq!(f.queue.approximate_len().await.unwrap(), 0);
        assert_eq!(status(&f, id).await, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_not_found_discards_without_success() {
        let f = fixture(RetryPolicy::default());
        let id = seed(&f, definitions(), JobStatus::InProgress).await;
        f.gateway
            .fail_once(ArtifactKind::Indexer, IndexingErrorKind::NotFound);

        let outcome = f.consumer.tick().await.unwrap();
        assert!(is_discard(&outcome));
        assert_ne!(status(&f, id).await, JobStatus::Success);
        assert_eq!(f.gateway.call_count(), 4);
    }

    #[tokio::test]
    async fn test_unknown_failure_retries() {
        let f = fixture(RetryPolicy::default());
        let id = seed(&f, definitions(), JobStatus::InProgress).await;
        f.gateway
            .fail_once(ArtifactKind::Datasource, IndexingErrorKind::Unknown);

        assert!(is_retry(&f.consumer.tick().await.unwrap()));
        assert_eq!(f.gateway.call_count(), 1);
        assert_eq!(status(&f, id).await, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn test_rejected_definition_retries() {
        let f = fixture(RetryPolicy::default());
        let id = seed(&f, definitions(), JobStatus::InProgress).await;
        f.gateway
            .fail_once(ArtifactKind::Index, IndexingErrorKind::Invalid);

        assert!(is_retry(&f.consumer.tick().await.unwrap()));
        assert_eq!(status(&f, id).await, JobStatus::InProgress);
        assert_eq!(f.queue.approximate_len().await.unwrap(), 1);

        f.consumer.tick().await.unwrap();
        assert_eq!(status(&f, id).await, JobStatus::Success);
        assert_eq!(f.queue.approximate_len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rejected_definition_capped_when_enabled() {
        let f = fixture(RetryPolicy {
            max_deliveries: 2,
            cap_unclassified: true,
        });
        let id = seed(&f, definitions(), JobStatus::InProgress).await;
        f.gateway
            .fail_always(ArtifactKind::Index, IndexingErrorKind::Invalid);

        assert!(is_retry(&f.consumer.tick().await.unwrap()));
        assert!(is_discard(&f.consumer.tick().await.unwrap()));
        assert_eq!(status(&f, id).await, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_job_still_created_is_retried() {
        let f = fixture(RetryPolicy::default());
        let id = seed(&f, definitions(), JobStatus::Created).await;

        assert!(is_retry(&f.consumer.tick().await.unwrap()));
        assert_eq!(f.gateway.call_count(), 0);
        assert_eq!(status(&f, id).await, JobStatus::Created);
    }

    #[tokio::test]
    async fn test_redelivery_after_success_does_not_resubmit() {
        let f = fixture(RetryPolicy::default());
        let id = seed(&f, definitions(), JobStatus::InProgress).await;
        f.consumer.tick().await.unwrap();
        assert_eq!(f.gateway.call_count(), 4);

        f.queue
            .send(&encode(&JobReference::new(id).with_blob_name("c1")).unwrap())
            .await
            .unwrap();
        let outcome = f.consumer.tick().await.unwrap();
        assert!(matches!(
            outcome,
            TickOutcome::Handled {
                disposition: Disposition::Complete,
                ..
            }
        ));
        assert_eq!(f.gateway.call_count(), 4);
        assert_eq!(status(&f, id).await, JobStatus::Success);
    }

    #[tokio::test]
    async fn test_unknown_job_is_discarded() {
        let f = fixture(RetryPolicy::default());
        f.queue
            .send(&encode(&JobReference::new(404)).unwrap())
            .await
            .unwrap();

        assert!(is_discard(&f.consumer.tick().await.unwrap()));
        assert_eq!(f.gateway.call_count(), 0);
    }
}
