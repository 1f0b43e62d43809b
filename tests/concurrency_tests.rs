//! Races between workers sharing one batch, one registry or one queue.

mod common;

use std::sync::Arc;

use common::*;
use futures::future::join_all;
use translation_pipeline::models::{
    FileDescriptor, FileFailure, FileJobPayload, NewBatchJob, TranslationOptions,
};
use translation_pipeline::store::RecordStore;
use translation_pipeline::workers::JobOutcome;
use translation_pipeline::{
    BatchStatus, InMemoryRecordStore, JobSubmitter, MessagingProvider, PipelineStage,
    ProgressAggregator, QueueRegistry,
};
use uuid::Uuid;

async fn batch_with_files(total: usize) -> (ProgressAggregator, Uuid) {
    let store = Arc::new(InMemoryRecordStore::new());
    let batch = NewBatchJob {
        user_id: TEST_USER.to_string(),
        files: (0..total)
            .map(|n| FileDescriptor::new(format!("deck-{n}.pptx"), format!("/uploads/{n}.pptx")))
            .collect(),
        options: TranslationOptions::new("en", "ja"),
    }
    .into_batch_job();
    store.create_batch_job(&batch).await.unwrap();
    store.mark_batch_started(batch.id).await.unwrap();
    (ProgressAggregator::new(store), batch.id)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_last_files_complete_batch_once() {
    for _ in 0..50 {
        let (aggregator, batch_id) = batch_with_files(2).await;
        let first = aggregator.clone();
        let second = aggregator.clone();

        let (a, b) = tokio::join!(
            tokio::spawn(async move { first.update_progress(batch_id, 1, 0).await }),
            tokio::spawn(async move { second.update_progress(batch_id, 1, 0).await }),
        );
        let a = a.unwrap().unwrap();
        let b = b.unwrap().unwrap();

        let completions = [a.completed_now(), b.completed_now()]
            .iter()
            .filter(|c| **c)
            .count();
        assert_eq!(completions, 1);

        let batch = aggregator
            .store()
            .find_batch_job(batch_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.processed_files, 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_outcomes_account_every_file() {
    let (aggregator, batch_id) = batch_with_files(15).await;

    let mut tasks = Vec::new();
    for n in 0..15 {
        let aggregator = aggregator.clone();
        tasks.push(tokio::spawn(async move {
            if n % 3 == 0 {
                aggregator
                    .record_file_failure(
                        batch_id,
                        FileFailure::new(format!("deck-{n}.pptx"), "corrupt archive"),
                    )
                    .await
            } else {
                aggregator.update_progress(batch_id, 1, 0).await
            }
        }));
    }
    let transitions: Vec<_> = join_all(tasks)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();

    assert_eq!(transitions.iter().filter(|t| t.completed_now()).count(), 1);

    let batch = aggregator
        .store()
        .find_batch_job(batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Completed);
    assert_eq!(batch.processed_files, 10);
    assert_eq!(batch.failed_files, 5);
    assert_eq!(batch.error_details.len(), 5);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failed_batch_stays_failed_under_progress() {
    let (aggregator, batch_id) = batch_with_files(4).await;
    aggregator
        .mark_failed(
            batch_id,
            &translation_pipeline::PipelineError::Database("connection reset".into()),
        )
        .await
        .unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let aggregator = aggregator.clone();
            tokio::spawn(async move { aggregator.update_progress(batch_id, 1, 0).await })
        })
        .collect();
    for joined in join_all(tasks).await {
        assert!(!joined.unwrap().unwrap().completed_now());
    }

    let batch = aggregator
        .store()
        .find_batch_job(batch_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(batch.status, BatchStatus::Failed);
    assert_eq!(batch.processed_files, 4);
    assert_eq!(batch.error_details.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_submitters_share_one_queue() {
    let provider = Arc::new(MessagingProvider::new_in_memory());
    let registry = Arc::new(QueueRegistry::new(provider.clone()));
    let submitter = JobSubmitter::new(registry.clone(), fast_policy());

    let tasks: Vec<_> = (0..32)
        .map(|n| {
            let submitter = submitter.clone();
            tokio::spawn(async move {
                submitter
                    .submit(PipelineStage::FileProcessing, format!("job-{n}"), None)
                    .await
            })
        })
        .collect();
    for joined in join_all(tasks).await {
        joined.unwrap().unwrap();
    }

    assert_eq!(registry.creation_count(), 1);
    assert!(registry.is_initialized(PipelineStage::FileProcessing));
    assert!(!registry.is_initialized(PipelineStage::Translation));
    assert_eq!(
        provider
            .as_in_memory()
            .unwrap()
            .queue_length("file-processing")
            .await,
        32
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_files_in_one_batch() {
    let h = PipelineHarness::new();
    let names: Vec<String> = (0..12).map(|n| format!("deck-{n}.pptx")).collect();
    let refs: Vec<&str> = names.iter().map(String::as_str).collect();
    let submission = h.submit(&refs).await;

    h.drain().await;

    let status = h.service.batch_status(submission.batch.id).await.unwrap();
    assert_eq!(status.status, BatchStatus::Completed);
    assert_eq!(status.processed_files, 12);
    assert_eq!(h.store.files_for_batch(submission.batch.id).len(), 12);
    assert_eq!(h.translator.calls(), 12);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_file_jobs_decompose_once() {
    for _ in 0..20 {
        let h = PipelineHarness::new();
        h.parser
            .with_document("deck.pptx", document(&[&["Hello", "World"]]));
        let submission = h.submit(&["deck.pptx"]).await;
        h.batch_worker.run_once().await.unwrap();

        let batch = &submission.batch;
        h.submitter
            .submit_file_job(FileJobPayload {
                user_id: batch.user_id.clone(),
                batch_job_id: batch.id,
                file: batch.files[0].clone(),
                options: batch.options.clone(),
            })
            .await
            .unwrap();
        assert_eq!(h.queue_length("file-processing").await, 2);

        let report = h.drain().await;
        assert_eq!(
            report.file,
            vec![JobOutcome::Completed, JobOutcome::Completed]
        );
        assert_eq!(report.translation, vec![JobOutcome::Completed]);
        assert_eq!(h.parser.calls(), 1);

        let files = h.store.files_for_batch(batch.id);
        assert_eq!(files.len(), 1);
        let structure = h.store.load_file_structure(files[0].id).await.unwrap();
        assert_eq!(structure.texts.len(), 2);
        let translations = h.store.translations_for_file(files[0].id);
        assert_eq!(translations.len(), 2);
        assert!(translations
            .iter()
            .all(|t| structure.texts.iter().any(|text| text.id == t.text_id)));

        let status = h.service.batch_status(batch.id).await.unwrap();
        assert_eq!(status.status, BatchStatus::Completed);
        assert_eq!(status.processed_files, 1);
    }
}
