//! End-to-end test infrastructure for the index provisioning pipeline.
//!
//! Provides a shared TestHarness wiring both consumers to RocksDB queues,
//! an in-memory object store and a scripted indexing gateway.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use pipeline_blob::{MemoryObjectStore, ObjectStore};
use pipeline_consumers::{
    encode, ContainerCleaner, Consumer, IngestConsumer, JobReference, ProvisionConsumer,
    RetryPolicy, TickOutcome,
};
use pipeline_search::MockIndexingGateway;
use pipeline_storage::{JobStore, MessageQueue, Storage, StorageQueue};
use pipeline_types::{CleanupSettings, Job, JobDefinitions, JobId, JobStatus, NewJob};

pub const PRIMARY_QUEUE: &str = "uploads-test";
pub const SECONDARY_QUEUE: &str = "finished-uploads-test";

/// Shared test harness for E2E tests.
///
/// Leases are zero so a message left for retry is visible on the next tick,
/// as if its lease had expired.
pub struct TestHarness {
    /// Keeps temp dir alive for the lifetime of the harness
    pub _temp_dir: tempfile::TempDir,
    pub storage: Arc<Storage>,
    pub object_store: Arc<MemoryObjectStore>,
    pub gateway: Arc<MockIndexingGateway>,
    pub primary: Arc<dyn MessageQueue>,
    pub secondary: Arc<dyn MessageQueue>,
    pub primary_poison: Arc<dyn MessageQueue>,
    pub secondary_poison: Arc<dyn MessageQueue>,
    pub ingest: IngestConsumer,
    pub provision: ProvisionConsumer,
}

impl TestHarness {
    /// Harness with default ignore list `["*.tmp"]` and the default policy.
    pub fn new() -> Self {
        Self::with_policy(RetryPolicy::default())
    }

    pub fn with_policy(policy: RetryPolicy) -> Self {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp dir");
        let storage =
            Arc::new(Storage::open(temp_dir.path()).expect("Failed to open test storage"));

        let queue = |name: &str| -> Arc<dyn MessageQueue> {
            Arc::new(StorageQueue::new(storage.clone(), name).expect("Invalid queue name"))
        };
        let primary = queue(PRIMARY_QUEUE);
        let secondary = queue(SECONDARY_QUEUE);
        let primary_poison = queue("uploads-test-poison");
        let secondary_poison = queue("finished-uploads-test-poison");

        let object_store = Arc::new(MemoryObjectStore::new());
        let gateway = Arc::new(MockIndexingGateway::new());
        let cleanup = CleanupSettings {
            default_ignore: vec!["*.tmp".to_string()],
            ..Default::default()
        };
        let cleaner = ContainerCleaner::new(object_store.clone(), &cleanup)
            .expect("Default rules should compile");

        let ingest = IngestConsumer::new(
            primary.clone(),
            secondary.clone(),
            storage.clone(),
            Arc::new(cleaner),
        )
        .with_policy(policy)
        .with_lease(Duration::ZERO)
        .with_dead_letter(primary_poison.clone());
        let provision = ProvisionConsumer::new(secondary.clone(), storage.clone(), gateway.clone())
            .with_policy(policy)
            .with_lease(Duration::ZERO)
            .with_dead_letter(secondary_poison.clone());

        Self {
            _temp_dir: temp_dir,
            storage,
            object_store,
            gateway,
            primary,
            secondary,
            primary_poison,
            secondary_poison,
            ingest,
            provision,
        }
    }

    /// Create a container holding `keys`, each with a one-byte body.
    pub async fn create_container(&self, container: &str, keys: &[&str]) {
        self.object_store
            .create_container(container)
            .await
            .expect("Failed to create container");
        for key in keys {
            self.object_store
                .put_object(container, key, b"x".to_vec())
                .await
                .expect("Failed to put object");
        }
    }

    /// Create jobs until one with `id` exists and return it.
    ///
    /// Ids are assigned sequentially, so lower ids are filled with
    /// placeholder jobs.
    pub async fn create_job_with_id(
        &self,
        id: JobId,
        container: &str,
        definitions: JobDefinitions,
    ) -> Job {
        loop {
            let job = self
                .storage
                .create(NewJob::new(format!("index-{}", container), container))
                .await
                .expect("Failed to create job");
            if job.id >= id {
                assert_eq!(job.id, id, "job id {} already taken", id);
                let update = pipeline_types::JobUpdate {
                    datasource: definitions.datasource.clone(),
                    index: definitions.index.clone(),
                    skillset: definitions.skillset.clone(),
                    indexer: definitions.indexer.clone(),
                    ..Default::default()
                };
                return self
                    .storage
                    .update(job.id, update)
                    .await
                    .expect("Failed to store definitions");
            }
        }
    }

    /// Enqueue `{indexId, blobName}` on the primary queue, as the upload
    /// producer does.
    pub async fn enqueue_upload(&self, id: JobId, container: &str) {
        let text = encode(&JobReference::new(id).with_blob_name(container))
            .expect("Failed to encode reference");
        self.primary.send(&text).await.expect("Failed to enqueue");
    }

    pub async fn job_status(&self, id: JobId) -> JobStatus {
        self.storage
            .find_by_id(id)
            .await
            .expect("Job lookup failed")
            .expect("Job should exist")
            .status
    }

    pub async fn tick_ingest(&self) -> TickOutcome {
        self.ingest.tick().await.expect("Ingest tick failed")
    }

    pub async fn tick_provision(&self) -> TickOutcome {
        self.provision.tick().await.expect("Provision tick failed")
    }

    pub async fn queue_len(queue: &Arc<dyn MessageQueue>) -> u64 {
        queue.approximate_len().await.expect("Queue length failed")
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

/// All four definitions populated with minimal documents.
pub fn full_definitions(name: &str) -> JobDefinitions {
    JobDefinitions {
        datasource: Some(json!({ "name": format!("{}-ds", name), "type": "azureblob" })),
        index: Some(json!({ "name": name, "fields": [] })),
        skillset: Some(json!({ "name": format!("{}-skills", name), "skills": [] })),
        indexer: Some(json!({
            "name": format!("{}-indexer", name),
            "dataSourceName": format!("{}-ds", name),
            "targetIndexName": name
        })),
    }
}
