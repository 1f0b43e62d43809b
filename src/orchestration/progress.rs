//! # Progress Aggregator
//!
//! Shared routines that mutate batch-level counters and drive the batch
//! status state machine. Called by the orchestrator and the stage workers.
//!
//! ## Atomicity
//!
//! Sibling file jobs of one batch finish concurrently and in any order, so
//! counter updates are commutative deltas handed to the record store as a
//! single atomic call. The returned [`BatchTransition`] tells the caller
//! whether it was the one update that completed the batch.
//!
//! ```rust
//! use std::sync::Arc;
//! use translation_pipeline::models::{FileDescriptor, NewBatchJob, TranslationOptions};
//! use translation_pipeline::store::{InMemoryRecordStore, RecordStore};
//! use translation_pipeline::ProgressAggregator;
//!
//! # tokio_test::block_on(async {
//! let store = Arc::new(InMemoryRecordStore::new());
//! let batch = NewBatchJob {
//!     user_id: "user-1".to_string(),
//!     files: vec![FileDescriptor::new("deck.pptx", "/uploads/deck.pptx")],
//!     options: TranslationOptions::new("en", "ja"),
//! }
//! .into_batch_job();
//! store.create_batch_job(&batch).await.unwrap();
//!
//! let aggregator = ProgressAggregator::new(store);
//! let transition = aggregator.update_progress(batch.id, 1, 0).await.unwrap();
//! assert!(transition.completed_now());
//! # });
//! ```

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    BatchErrorEntry, BatchFailure, BatchProgressDelta, BatchTransition, FileFailure,
    TranslationFailure,
};
use crate::store::RecordStore;

#[derive(Debug, Clone)]
pub struct ProgressAggregator {
    store: Arc<dyn RecordStore>,
}

impl ProgressAggregator {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    /// Add `processed_delta`/`failed_delta` to the batch counters.
    ///
    /// Sets COMPLETED (with `completedAt`) once `processed + failed` reaches
    /// `total`, otherwise PROCESSING. FAILED and CANCELLED batches keep their
    /// status.
    #[instrument(skip(self))]
    pub async fn update_progress(
        &self,
        batch_job_id: Uuid,
        processed_delta: i32,
        failed_delta: i32,
    ) -> PipelineResult<BatchTransition> {
        let delta = BatchProgressDelta {
            processed: processed_delta,
            failed: failed_delta,
            error: None,
        };
        let transition = self.store.apply_batch_progress(batch_job_id, &delta).await?;
        self.log_transition(&transition);
        Ok(transition)
    }

    /// Append a file failure and count the file as failed, in one store call
    #[instrument(skip(self, failure), fields(file_name = %failure.file_name))]
    pub async fn record_file_failure(
        &self,
        batch_job_id: Uuid,
        failure: FileFailure,
    ) -> PipelineResult<BatchTransition> {
        warn!(
            batch_job_id = %batch_job_id,
            file_name = %failure.file_name,
            error = %failure.message,
            "Recording permanent file failure"
        );
        let delta = BatchProgressDelta::file_failed(failure);
        let transition = self.store.apply_batch_progress(batch_job_id, &delta).await?;
        self.log_transition(&transition);
        Ok(transition)
    }

    /// Append a permanently failed translation group to `errorDetails`.
    /// Counters and status are left alone: the file was already counted.
    #[instrument(skip(self, failure), fields(file_id = %failure.file_id))]
    pub async fn record_translation_failure(
        &self,
        batch_job_id: Uuid,
        failure: TranslationFailure,
    ) -> PipelineResult<BatchTransition> {
        warn!(
            batch_job_id = %batch_job_id,
            file_id = %failure.file_id,
            texts = failure.text_count,
            error = %failure.message,
            "Recording permanent translation failure"
        );
        let delta = BatchProgressDelta::error_only(BatchErrorEntry::TranslationFailure(failure));
        self.store.apply_batch_progress(batch_job_id, &delta).await
    }

    /// Set FAILED, append the error context to `errorDetails`, stamp `completedAt`
    #[instrument(skip(self, error))]
    pub async fn mark_failed(
        &self,
        batch_job_id: Uuid,
        error: &PipelineError,
    ) -> PipelineResult<BatchTransition> {
        let entry = BatchErrorEntry::BatchFailure(BatchFailure::from_error(error));
        let transition = self.store.mark_batch_failed(batch_job_id, &entry).await?;
        if transition.failed_now() {
            warn!(
                batch_job_id = %batch_job_id,
                error = %error,
                errors_recorded = transition.batch.error_details.len(),
                "Batch marked failed"
            );
        }
        Ok(transition)
    }

    fn log_transition(&self, transition: &BatchTransition) {
        let batch = &transition.batch;
        if transition.completed_now() {
            info!(
                batch_job_id = %batch.id,
                processed_files = batch.processed_files,
                failed_files = batch.failed_files,
                total_files = batch.total_files,
                "Batch completed"
            );
        } else {
            debug!(
                batch_job_id = %batch.id,
                status = %batch.status,
                progress = batch.progress_percent(),
                "Batch progress updated"
            );
        }
    }
}
