//! # Batch Service
//!
//! Boundary used by the dashboard layer: accept a batch, cancel it, retry a
//! finished one, and report its progress. Everything a client sees about a
//! batch comes through [`BatchStatusView`].

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    BatchErrorEntry, BatchJob, BatchJobPayload, BatchStatus, FileDescriptor, NewBatchJob,
    TranslationOptions,
};
use crate::queues::{JobSubmitter, SubmittedJob};
use crate::store::RecordStore;

/// Accepted batch plus the orchestrator job that will fan it out
#[derive(Debug, Clone)]
pub struct BatchSubmission {
    pub batch: BatchJob,
    pub job: SubmittedJob,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchStatusView {
    pub batch_job_id: Uuid,
    pub status: BatchStatus,
    pub total_files: i32,
    pub processed_files: i32,
    pub failed_files: i32,
    pub progress: u8,
    pub error_details: Vec<BatchErrorEntry>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&BatchJob> for BatchStatusView {
    fn from(batch: &BatchJob) -> Self {
        Self {
            batch_job_id: batch.id,
            status: batch.status,
            total_files: batch.total_files,
            processed_files: batch.processed_files,
            failed_files: batch.failed_files,
            progress: batch.progress_percent(),
            error_details: batch.error_details.clone(),
            started_at: batch.started_at,
            completed_at: batch.completed_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BatchService {
    store: Arc<dyn RecordStore>,
    submitter: JobSubmitter,
}

impl BatchService {
    pub fn new(store: Arc<dyn RecordStore>, submitter: JobSubmitter) -> Self {
        Self { store, submitter }
    }

    /// Create the batch (PENDING), mark it PROCESSING and enqueue the
    /// orchestrator job.
    #[instrument(skip(self, files, options), fields(file_count = files.len()))]
    pub async fn submit_batch(
        &self,
        user_id: &str,
        files: Vec<FileDescriptor>,
        options: TranslationOptions,
    ) -> PipelineResult<BatchSubmission> {
        if files.is_empty() {
            return Err(PipelineError::InvalidBatchRequest(
                "a batch needs at least one file".to_string(),
            ));
        }
        if user_id.trim().is_empty() {
            return Err(PipelineError::InvalidBatchRequest(
                "user id is required".to_string(),
            ));
        }
        // File jobs are keyed by (batch, storage path).
        let mut seen = HashSet::with_capacity(files.len());
        if let Some(duplicate) = files.iter().find(|f| !seen.insert(f.storage_path.as_str())) {
            return Err(PipelineError::InvalidBatchRequest(format!(
                "storage path {} is listed more than once",
                duplicate.storage_path
            )));
        }

        let batch = NewBatchJob {
            user_id: user_id.to_string(),
            files,
            options,
        }
        .into_batch_job();
        self.store.create_batch_job(&batch).await?;
        let transition = self.store.mark_batch_started(batch.id).await?;

        let job = self
            .submitter
            .submit_batch_job(BatchJobPayload {
                batch_job_id: batch.id,
                user_id: batch.user_id.clone(),
                files: batch.files.clone(),
                options: batch.options.clone(),
            })
            .await?;

        info!(
            batch_job_id = %batch.id,
            job_id = %job.job_id,
            total_files = batch.total_files,
            "Batch accepted"
        );
        Ok(BatchSubmission {
            batch: transition.batch,
            job,
        })
    }

    /// Cancel a batch that has not finished yet
    #[instrument(skip(self))]
    pub async fn cancel_batch(&self, batch_job_id: Uuid) -> PipelineResult<BatchJob> {
        let transition = self.store.cancel_batch_job(batch_job_id).await?;
        info!(
            batch_job_id = %batch_job_id,
            previous_status = %transition.previous_status,
            "Batch cancelled"
        );
        Ok(transition.batch)
    }

    /// Submit a finished batch again as a new batch with the same files and options
    #[instrument(skip(self))]
    pub async fn retry_batch(&self, batch_job_id: Uuid) -> PipelineResult<BatchSubmission> {
        let original = self
            .store
            .find_batch_job(batch_job_id)
            .await?
            .ok_or(PipelineError::BatchNotFound(batch_job_id))?;

        if !original.is_terminal() {
            return Err(PipelineError::invalid_transition(
                batch_job_id,
                original.status,
                "retry",
            ));
        }

        let submission = self
            .submit_batch(&original.user_id, original.files, original.options)
            .await?;
        info!(
            original_batch_job_id = %batch_job_id,
            batch_job_id = %submission.batch.id,
            "Batch resubmitted"
        );
        Ok(submission)
    }

    pub async fn batch_status(&self, batch_job_id: Uuid) -> PipelineResult<BatchStatusView> {
        let batch = self
            .store
            .find_batch_job(batch_job_id)
            .await?
            .ok_or(PipelineError::BatchNotFound(batch_job_id))?;
        Ok(BatchStatusView::from(&batch))
    }
}
