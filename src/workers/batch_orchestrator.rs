//! # Batch Orchestrator
//!
//! Fans a batch out into one file decomposition job per file. Reports
//! submission progress (`processedJobs/totalJobs`) to the queue backend;
//! completion progress lives on the batch record and is driven by the
//! file stage.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, instrument, warn};

use super::context::JobContext;
use super::handler::JobHandler;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{BatchJobPayload, BatchStatus, FileJobPayload};
use crate::orchestration::ProgressAggregator;
use crate::queues::{JobSubmitter, PipelineStage};
use crate::store::RecordStore;

#[derive(Debug, Clone)]
pub struct BatchOrchestratorHandler {
    store: Arc<dyn RecordStore>,
    submitter: JobSubmitter,
    aggregator: ProgressAggregator,
}

impl BatchOrchestratorHandler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        submitter: JobSubmitter,
        aggregator: ProgressAggregator,
    ) -> Self {
        Self {
            store,
            submitter,
            aggregator,
        }
    }
}

/// Files already fanned out by an earlier execution of the same job
fn resume_point(previous: Option<&Value>, total: usize) -> usize {
    previous
        .and_then(|progress| progress.get("processedJobs"))
        .and_then(Value::as_u64)
        .map(|n| (n as usize).min(total))
        .unwrap_or(0)
}

#[async_trait]
impl JobHandler for BatchOrchestratorHandler {
    type Payload = BatchJobPayload;

    fn stage(&self) -> PipelineStage {
        PipelineStage::BatchTranslation
    }

    #[instrument(skip(self, ctx, payload), fields(batch_job_id = %payload.batch_job_id, attempt = ctx.attempt))]
    async fn handle(&self, ctx: &JobContext, payload: BatchJobPayload) -> PipelineResult<()> {
        let batch = self
            .store
            .find_batch_job(payload.batch_job_id)
            .await?
            .ok_or(PipelineError::BatchNotFound(payload.batch_job_id))?;

        if batch.status == BatchStatus::Cancelled {
            info!(batch_job_id = %batch.id, "Batch cancelled, skipping fan-out");
            return Ok(());
        }

        let total = payload.files.len();
        let start = resume_point(ctx.previous_progress(), total);
        if start > 0 {
            info!(
                batch_job_id = %batch.id,
                already_submitted = start,
                total,
                "Resuming fan-out"
            );
        }

        for (index, file) in payload.files.iter().enumerate().skip(start) {
            self.submitter
                .submit_file_job(FileJobPayload {
                    user_id: payload.user_id.clone(),
                    batch_job_id: payload.batch_job_id,
                    file: file.clone(),
                    options: payload.options.clone(),
                })
                .await?;
            ctx.report_progress(json!({
                "processedJobs": index + 1,
                "totalJobs": total,
            }))
            .await?;
        }

        info!(batch_job_id = %batch.id, file_jobs = total, "Batch fanned out");
        Ok(())
    }

    async fn on_exhausted(
        &self,
        payload: &BatchJobPayload,
        error: &PipelineError,
    ) -> PipelineResult<()> {
        if matches!(error, PipelineError::BatchNotFound(_)) {
            warn!(batch_job_id = %payload.batch_job_id, "No batch record to mark failed");
            return Ok(());
        }
        self.aggregator
            .mark_failed(payload.batch_job_id, error)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resume_point_is_clamped() {
        assert_eq!(resume_point(None, 3), 0);
        assert_eq!(resume_point(Some(&json!({"processedJobs": 2})), 3), 2);
        assert_eq!(resume_point(Some(&json!({"processedJobs": 9})), 3), 3);
        assert_eq!(resume_point(Some(&json!({"status": "x"})), 3), 0);
    }
}
