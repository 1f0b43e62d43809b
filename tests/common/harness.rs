//! In-process pipeline wired to the in-memory queue backend and record store.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use translation_pipeline::models::{FileDescriptor, TranslationOptions};
use translation_pipeline::orchestration::{BatchService, BatchSubmission};
use translation_pipeline::queues::Backoff;
use translation_pipeline::store::RecordStore;
use translation_pipeline::workers::{
    BatchOrchestratorHandler, FileDecompositionHandler, JobOutcome, TranslationHandler,
    WorkspaceManager,
};
use translation_pipeline::{
    InMemoryRecordStore, JobSubmitter, MessagingProvider, ProgressAggregator, QueueRegistry,
    RetryPolicy, StageWorker,
};

use super::fakes::{FakeParser, FakeTranslator};

pub const TEST_USER: &str = "user-1";
pub const TEST_MODEL: &str = "test-model";

/// Three attempts, no backoff, short timeout
pub fn fast_policy() -> RetryPolicy {
    RetryPolicy {
        attempts: 3,
        backoff: Backoff::Fixed {
            delay: Duration::ZERO,
        },
        retention: Duration::from_secs(60),
        timeout: Duration::from_secs(5),
    }
}

/// Outcomes per stage collected by [`PipelineHarness::drain`]
#[derive(Debug, Default)]
pub struct DrainReport {
    pub batch: Vec<JobOutcome>,
    pub file: Vec<JobOutcome>,
    pub translation: Vec<JobOutcome>,
}

impl DrainReport {
    pub fn count(outcomes: &[JobOutcome], wanted: JobOutcome) -> usize {
        outcomes.iter().filter(|outcome| **outcome == wanted).count()
    }
}

pub struct PipelineHarness {
    pub provider: Arc<MessagingProvider>,
    pub store: Arc<InMemoryRecordStore>,
    pub submitter: JobSubmitter,
    pub service: BatchService,
    pub aggregator: ProgressAggregator,
    pub parser: Arc<FakeParser>,
    pub translator: Arc<FakeTranslator>,
    pub batch_worker: StageWorker<BatchOrchestratorHandler>,
    pub file_worker: StageWorker<FileDecompositionHandler>,
    pub translation_worker: StageWorker<TranslationHandler>,
    pub uploads: TempDir,
    pub workspace: TempDir,
}

impl PipelineHarness {
    pub fn new() -> Self {
        Self::with_settings(10, fast_policy())
    }

    pub fn with_settings(chunk_size: usize, policy: RetryPolicy) -> Self {
        let provider = Arc::new(MessagingProvider::new_in_memory());
        let registry = Arc::new(QueueRegistry::new(provider.clone()));
        let submitter = JobSubmitter::new(registry, policy);

        let store = Arc::new(InMemoryRecordStore::new());
        let records: Arc<dyn RecordStore> = store.clone();
        let aggregator = ProgressAggregator::new(records.clone());
        let parser = Arc::new(FakeParser::new());
        let translator = Arc::new(FakeTranslator::new());

        let uploads = tempfile::tempdir().expect("uploads dir");
        let workspace = tempfile::tempdir().expect("workspace dir");
        let poll = Duration::from_millis(10);

        let batch_worker = StageWorker::new(
            Arc::new(BatchOrchestratorHandler::new(
                records.clone(),
                submitter.clone(),
                aggregator.clone(),
            )),
            submitter.clone(),
            4,
            poll,
        );
        let file_worker = StageWorker::new(
            Arc::new(FileDecompositionHandler::new(
                records.clone(),
                submitter.clone(),
                aggregator.clone(),
                parser.clone(),
                WorkspaceManager::new(workspace.path()),
                chunk_size,
            )),
            submitter.clone(),
            4,
            poll,
        );
        let translation_worker = StageWorker::new(
            Arc::new(TranslationHandler::new(
                records.clone(),
                aggregator.clone(),
                translator.clone(),
                TEST_MODEL,
            )),
            submitter.clone(),
            2,
            poll,
        );

        Self {
            service: BatchService::new(records, submitter.clone()),
            provider,
            store,
            submitter,
            aggregator,
            parser,
            translator,
            batch_worker,
            file_worker,
            translation_worker,
            uploads,
            workspace,
        }
    }

    /// Write a source file into the uploads directory
    pub fn upload(&self, name: &str) -> FileDescriptor {
        let path = self.uploads.path().join(name);
        std::fs::write(&path, b"PK\x03\x04 fake presentation").expect("write upload");
        FileDescriptor::new(name, path.to_string_lossy())
    }

    pub async fn submit(&self, names: &[&str]) -> BatchSubmission {
        let files = names.iter().map(|name| self.upload(name)).collect();
        self.service
            .submit_batch(TEST_USER, files, TranslationOptions::new("en", "ja"))
            .await
            .expect("submit batch")
    }

    /// Run every stage until no queue has visible work left
    pub async fn drain(&self) -> DrainReport {
        let mut report = DrainReport::default();
        for _ in 0..100 {
            let batch = self.batch_worker.run_once().await.expect("batch stage");
            let file = self.file_worker.run_once().await.expect("file stage");
            let translation = self
                .translation_worker
                .run_once()
                .await
                .expect("translation stage");

            let idle = batch.is_empty() && file.is_empty() && translation.is_empty();
            report.batch.extend(batch);
            report.file.extend(file);
            report.translation.extend(translation);
            if idle {
                return report;
            }
        }
        panic!("pipeline did not go idle: {report:?}");
    }

    pub async fn queue_length(&self, queue: &str) -> usize {
        self.provider
            .as_in_memory()
            .expect("in-memory backend")
            .queue_length(queue)
            .await
    }
}
