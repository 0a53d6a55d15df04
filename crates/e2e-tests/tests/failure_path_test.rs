//! Failure-path E2E tests: poison messages, retries, redelivery.
//!
//! Every message must end up either processed, left for redelivery, or
//! discarded; no path may leave a job in a state the queue cannot recover.

use pretty_assertions::assert_eq;

use e2e_tests::{full_definitions, TestHarness};
use pipeline_consumers::{encode, Disposition, JobReference, RetryPolicy, TickOutcome};
use pipeline_search::IndexingErrorKind;
use pipeline_storage::JobStore;
use pipeline_types::{ArtifactKind, JobStatus, JobUpdate};

fn disposition(outcome: TickOutcome) -> Disposition {
    match outcome {
        TickOutcome::Handled { disposition, .. } => disposition,
        TickOutcome::Idle => panic!("expected a handled message"),
    }
}

/// Stage 2 with a missing skillset makes zero gateway calls and never
/// reaches SUCCESS.
#[tokio::test]
async fn test_missing_definition_makes_no_gateway_calls() {
    let harness = TestHarness::new();
    harness.create_container("c1", &["a.txt"]).await;
    let mut definitions = full_definitions("index-c1");
    definitions.skillset = None;
    let job = harness.create_job_with_id(1, "c1", definitions).await;
    harness.enqueue_upload(job.id, "c1").await;

    assert_eq!(disposition(harness.tick_ingest().await), Disposition::Complete);
    let d = disposition(harness.tick_provision().await);
    assert!(matches!(d, Disposition::Discard { .. }), "got {:?}", d);
    assert!(d.reason().unwrap().contains("skillset"));

    assert_eq!(harness.gateway.call_count(), 0);
    assert_eq!(harness.job_status(job.id).await, JobStatus::Failed);
    assert_eq!(TestHarness::queue_len(&harness.secondary).await, 0);
    assert_eq!(TestHarness::queue_len(&harness.secondary_poison).await, 1);
}

/// A message without a container reference is discarded before any
/// storage is touched.
#[tokio::test]
async fn test_message_without_container_is_poison() {
    let harness = TestHarness::new();
    harness.create_container("c1", &["b.tmp"]).await;
    let job = harness
        .create_job_with_id(1, "c1", full_definitions("index-c1"))
        .await;
    harness
        .primary
        .send(&encode(&JobReference::new(job.id)).unwrap())
        .await
        .unwrap();

    let d = disposition(harness.tick_ingest().await);
    assert!(matches!(d, Disposition::Discard { .. }));
    assert!(harness.object_store.delete_calls().is_empty());
    assert_eq!(harness.job_status(job.id).await, JobStatus::Created);
    assert_eq!(TestHarness::queue_len(&harness.primary).await, 0);
    assert_eq!(TestHarness::queue_len(&harness.primary_poison).await, 1);
    assert_eq!(TestHarness::queue_len(&harness.secondary).await, 0);
}

/// Garbage on the queue is discarded instead of blocking it.
#[tokio::test]
async fn test_undecodable_message_does_not_block_queue() {
    let harness = TestHarness::new();
    harness.primary.send("%%% not a job %%%").await.unwrap();
    harness.create_container("c2", &["x.tmp"]).await;
    let job = harness
        .create_job_with_id(1, "c2", full_definitions("index-c2"))
        .await;
    harness.enqueue_upload(job.id, "c2").await;

    assert!(matches!(
        disposition(harness.tick_ingest().await),
        Disposition::Discard { .. }
    ));
    assert_eq!(disposition(harness.tick_ingest().await), Disposition::Complete);
    assert_eq!(harness.job_status(job.id).await, JobStatus::InProgress);
}

/// Redelivering a reference for a job already SUCCESS does not resubmit.
#[tokio::test]
async fn test_redelivery_after_success_is_idempotent() {
    let harness = TestHarness::new();
    harness.create_container("c3", &["a.txt"]).await;
    let job = harness
        .create_job_with_id(1, "c3", full_definitions("index-c3"))
        .await;
    harness.enqueue_upload(job.id, "c3").await;
    harness.tick_ingest().await;
    harness.tick_provision().await;
    assert_eq!(harness.gateway.call_count(), 4);

    // The same reference arrives again on both queues
    harness.enqueue_upload(job.id, "c3").await;
    let text = encode(&JobReference::new(job.id).with_blob_name("c3")).unwrap();
    harness.secondary.send(&text).await.unwrap();

    assert_eq!(disposition(harness.tick_ingest().await), Disposition::Complete);
    assert_eq!(disposition(harness.tick_provision().await), Disposition::Complete);

    assert_eq!(harness.gateway.call_count(), 4);
    assert_eq!(harness.job_status(job.id).await, JobStatus::Success);
    assert_eq!(TestHarness::queue_len(&harness.secondary).await, 0);
}

/// A rate limit is retried through lease expiry and then succeeds.
#[tokio::test]
async fn test_rate_limit_recovers_on_redelivery() {
    let harness = TestHarness::new();
    harness.create_container("c4", &["a.txt"]).await;
    let job = harness
        .create_job_with_id(1, "c4", full_definitions("index-c4"))
        .await;
    harness
        .gateway
        .fail_times(ArtifactKind::Indexer, IndexingErrorKind::RateLimited, 2);
    harness.enqueue_upload(job.id, "c4").await;
    harness.tick_ingest().await;

    for _ in 0..2 {
        let d = disposition(harness.tick_provision().await);
        assert!(matches!(d, Disposition::Retry { .. }), "got {:?}", d);
        assert_eq!(harness.job_status(job.id).await, JobStatus::InProgress);
    }
    assert_eq!(disposition(harness.tick_provision().await), Disposition::Complete);
    assert_eq!(harness.job_status(job.id).await, JobStatus::Success);
    // 4 calls per attempt, three attempts
    assert_eq!(harness.gateway.call_count(), 12);
}

/// A persistent rate limit is given up on the tenth delivery.
#[tokio::test]
async fn test_rate_limit_exhaustion() {
    let harness = TestHarness::with_policy(RetryPolicy {
        max_deliveries: 10,
        cap_unclassified: false,
    });
    harness.create_container("c5", &["a.txt"]).await;
    let job = harness
        .create_job_with_id(1, "c5", full_definitions("index-c5"))
        .await;
    harness
        .gateway
        .fail_always(ArtifactKind::Datasource, IndexingErrorKind::RateLimited);
    harness.enqueue_upload(job.id, "c5").await;
    harness.tick_ingest().await;

    for delivery in 1..10 {
        let d = disposition(harness.tick_provision().await);
        assert!(
            matches!(d, Disposition::Retry { .. }),
            "delivery {} got {:?}",
            delivery,
            d
        );
    }
    let last = disposition(harness.tick_provision().await);
    assert!(matches!(last, Disposition::Discard { .. }));
    assert!(last.reason().unwrap().contains("exhausted"));

    assert_eq!(harness.gateway.call_count(), 10);
    assert_eq!(harness.job_status(job.id).await, JobStatus::Failed);
    assert_eq!(TestHarness::queue_len(&harness.secondary).await, 0);
    assert_eq!(harness.tick_provision().await, TickOutcome::Idle);
}

/// A job reference that reaches stage 2 before its job leaves CREATED waits.
#[tokio::test]
async fn test_stage_two_waits_for_cleanup() {
    let harness = TestHarness::new();
    harness.create_container("c6", &["a.txt"]).await;
    let job = harness
        .create_job_with_id(1, "c6", full_definitions("index-c6"))
        .await;
    let text = encode(&JobReference::new(job.id).with_blob_name("c6")).unwrap();
    harness.secondary.send(&text).await.unwrap();

    let d = disposition(harness.tick_provision().await);
    assert!(matches!(d, Disposition::Retry { .. }));
    assert_eq!(harness.gateway.call_count(), 0);

    harness
        .storage
        .update(job.id, JobUpdate::status(JobStatus::InProgress))
        .await
        .unwrap();
    assert_eq!(disposition(harness.tick_provision().await), Disposition::Complete);
    assert_eq!(harness.job_status(job.id).await, JobStatus::Success);
}

/// A container that is not listable yet is retried, then given up on at
/// the delivery ceiling.
#[tokio::test]
async fn test_missing_container_retries_until_ceiling() {
    let harness = TestHarness::with_policy(RetryPolicy {
        max_deliveries: 3,
        cap_unclassified: false,
    });
    let job = harness
        .create_job_with_id(1, "gone", full_definitions("index-gone"))
        .await;
    harness.enqueue_upload(job.id, "gone").await;

    for _ in 0..2 {
        let d = disposition(harness.tick_ingest().await);
        assert!(matches!(d, Disposition::Retry { .. }), "got {:?}", d);
        assert_eq!(TestHarness::queue_len(&harness.primary).await, 1);
    }
    let d = disposition(harness.tick_ingest().await);
    assert!(matches!(d, Disposition::Discard { .. }), "got {:?}", d);
    assert!(d.reason().unwrap().contains("exhausted"));

    assert_eq!(harness.job_status(job.id).await, JobStatus::Created);
    assert_eq!(TestHarness::queue_len(&harness.primary).await, 0);
    assert_eq!(TestHarness::queue_len(&harness.primary_poison).await, 1);
    assert_eq!(TestHarness::queue_len(&harness.secondary).await, 0);
}
