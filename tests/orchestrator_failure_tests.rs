//! Batch orchestrator behavior when the record store misbehaves, and when a
//! fan-out resumes from a previous attempt.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use serde_json::json;
use translation_pipeline::models::{
    BatchErrorEntry, BatchJobPayload, NewBatchJob, TranslationOptions,
};
use translation_pipeline::orchestration::BatchSubmission;
use translation_pipeline::queues::JobEnvelope;
use translation_pipeline::store::RecordStore;
use translation_pipeline::workers::{BatchOrchestratorHandler, JobOutcome};
use translation_pipeline::{BatchStatus, PipelineStage, ProgressAggregator, StageWorker};

fn orchestrator_over(
    h: &PipelineHarness,
    store: Arc<FlakyStore>,
) -> StageWorker<BatchOrchestratorHandler> {
    let records: Arc<dyn RecordStore> = store;
    StageWorker::new(
        Arc::new(BatchOrchestratorHandler::new(
            records.clone(),
            h.submitter.clone(),
            ProgressAggregator::new(records),
        )),
        h.submitter.clone(),
        1,
        Duration::from_millis(10),
    )
}

async fn run_until_idle(worker: &StageWorker<BatchOrchestratorHandler>) -> Vec<JobOutcome> {
    let mut outcomes = Vec::new();
    for _ in 0..20 {
        let round = worker.run_once().await.expect("batch stage");
        if round.is_empty() {
            return outcomes;
        }
        outcomes.extend(round);
    }
    panic!("orchestrator did not go idle: {outcomes:?}");
}

async fn submit_three(h: &PipelineHarness) -> BatchSubmission {
    h.submit(&["a.pptx", "b.pptx", "c.pptx"]).await
}

#[tokio::test]
async fn test_store_outage_exhausts_retries_and_fails_batch() {
    let h = PipelineHarness::new();
    let flaky = Arc::new(FlakyStore::new(h.store.clone()));
    flaky.fail_lookups(u32::MAX);
    let orchestrator = orchestrator_over(&h, flaky.clone());

    let submission = submit_three(&h).await;
    let outcomes = run_until_idle(&orchestrator).await;
    assert_eq!(
        outcomes,
        vec![JobOutcome::Retried, JobOutcome::Retried, JobOutcome::Failed]
    );
    assert_eq!(flaky.lookups(), 3);
    assert_eq!(h.queue_length("file-processing").await, 0);

    let batch = h
        .store
        .find_batch_job(submission.batch.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert!(batch.completed_at.is_some());
    match batch.error_details.as_slice() {
        [BatchErrorEntry::BatchFailure(failure)] => {
            assert!(failure.message.contains("Database error"));
            assert!(failure.detail.contains("connection reset"));
            assert!(failure.timestamp <= chrono::Utc::now());
        }
        other => panic!("expected one batch failure, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_retryable_store_error_fails_batch_at_once() {
    let h = PipelineHarness::new();
    let flaky = Arc::new(FlakyStore::new(h.store.clone()));
    flaky.corrupt_next_lookup();
    let orchestrator = orchestrator_over(&h, flaky.clone());

    let submission = submit_three(&h).await;
    let outcomes = run_until_idle(&orchestrator).await;
    assert_eq!(outcomes, vec![JobOutcome::Failed]);
    assert_eq!(flaky.lookups(), 1);

    let status = h.service.batch_status(submission.batch.id).await.unwrap();
    assert_eq!(status.status, BatchStatus::Failed);
    assert_eq!(status.error_details.len(), 1);
    assert!(status.error_details[0]
        .message()
        .contains("Serialization error"));
    assert_eq!(h.queue_length("file-processing").await, 0);
}

#[tokio::test]
async fn test_transient_store_error_fans_out_once() {
    let h = PipelineHarness::new();
    let flaky = Arc::new(FlakyStore::new(h.store.clone()));
    flaky.fail_lookups(1);
    let orchestrator = orchestrator_over(&h, flaky.clone());

    let submission = submit_three(&h).await;
    let outcomes = run_until_idle(&orchestrator).await;
    assert_eq!(outcomes, vec![JobOutcome::Retried, JobOutcome::Completed]);
    assert_eq!(h.queue_length("file-processing").await, 3);

    let batch = h
        .store
        .find_batch_job(submission.batch.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Processing);
    assert!(batch.error_details.is_empty());
}

#[tokio::test]
async fn test_retried_fan_out_resumes_after_submitted_files() {
    let h = PipelineHarness::new();
    let batch = NewBatchJob {
        user_id: TEST_USER.to_string(),
        files: ["a.pptx", "b.pptx", "c.pptx"]
            .iter()
            .map(|name| h.upload(name))
            .collect(),
        options: TranslationOptions::new("en", "ja"),
    }
    .into_batch_job();
    h.store.create_batch_job(&batch).await.unwrap();
    h.store.mark_batch_started(batch.id).await.unwrap();

    let payload = BatchJobPayload {
        batch_job_id: batch.id,
        user_id: batch.user_id.clone(),
        files: batch.files.clone(),
        options: batch.options.clone(),
    };
    let mut envelope = JobEnvelope::new(PipelineStage::BatchTranslation, payload, fast_policy());
    envelope.attempts_made = 1;
    envelope.last_error = Some("Messaging error: queue unavailable".to_string());
    envelope.progress = Some(json!({"processedJobs": 2, "totalJobs": 3}));
    h.submitter
        .send_envelope(&envelope, Duration::ZERO)
        .await
        .unwrap();

    let outcomes = h.batch_worker.run_once().await.unwrap();
    assert_eq!(outcomes, vec![JobOutcome::Completed]);
    assert_eq!(h.queue_length("file-processing").await, 1);

    let report = h.drain().await;
    assert_eq!(report.file, vec![JobOutcome::Completed]);
    let files = h.store.files_for_batch(batch.id);
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].original_name, "c.pptx");
}
