//! # File Decomposition
//!
//! Turns one uploaded file into slide and text records and fans its texts
//! out into translation groups.
//!
//! ## Retry safety
//!
//! The job is keyed by `(batchJobId, storagePath)`:
//! - a READY record means an earlier execution finished; nothing is redone;
//! - the file is claimed for the job id before any work, so a duplicate job
//!   delivered alongside the original backs off instead of parsing again;
//! - a record with persisted structure is reused without re-parsing;
//! - otherwise the file is parsed and slides and texts are written in one
//!   transaction, so no partial set survives a failure.
//!
//! A claim older than the job's visibility window is treated as abandoned.
//!
//! Any failure forces the file record to ERROR. The batch only learns about
//! the failure once the job is permanently failed (see `on_exhausted`).

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use super::context::JobContext;
use super::handler::JobHandler;
use super::workspace::WorkspaceManager;
use crate::collaborators::DocumentParser;
use crate::constants::policy::VISIBILITY_GRACE;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    BatchStatus, FileFailure, FileJobPayload, FileRecord, FileStatus, FileStructure, TextItem,
    TranslationGroupPayload,
};
use crate::orchestration::ProgressAggregator;
use crate::queues::{JobSubmitter, PipelineStage};
use crate::store::RecordStore;

/// Progress marker written once the file is fully decomposed
const READY_MARKER: &str = "ready";

#[derive(Debug, Clone)]
pub struct FileDecompositionHandler {
    store: Arc<dyn RecordStore>,
    submitter: JobSubmitter,
    aggregator: ProgressAggregator,
    parser: Arc<dyn DocumentParser>,
    workspace: WorkspaceManager,
    chunk_size: usize,
}

impl FileDecompositionHandler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        submitter: JobSubmitter,
        aggregator: ProgressAggregator,
        parser: Arc<dyn DocumentParser>,
        workspace: WorkspaceManager,
        chunk_size: usize,
    ) -> Self {
        Self {
            store,
            submitter,
            aggregator,
            parser,
            workspace,
            chunk_size: chunk_size.max(1),
        }
    }

    async fn register_file(&self, payload: &FileJobPayload) -> PipelineResult<FileRecord> {
        let path = &payload.file.storage_path;
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| PipelineError::SourceFile {
                path: path.clone(),
                message: e.to_string(),
            })?;

        let record = FileRecord::new(
            Uuid::new_v4(),
            payload.batch_job_id,
            payload.user_id.clone(),
            payload.file.name.clone(),
            path.clone(),
            metadata.len() as i64,
        );
        self.store.create_file_record(&record).await
    }

    /// Load the persisted structure, or parse the file and persist it
    async fn structure_for(
        &self,
        ctx: &JobContext,
        payload: &FileJobPayload,
        file: &FileRecord,
    ) -> PipelineResult<FileStructure> {
        let existing = self.store.load_file_structure(file.id).await?;
        if !existing.is_empty() {
            debug!(file_id = %file.id, slides = existing.slides.len(), "Reusing persisted structure");
            return Ok(existing);
        }

        let output_dir = self.workspace.create(&payload.user_id, file.id).await?;
        ctx.report_progress(json!({ "status": "parsing" })).await?;
        let document = self
            .parser
            .parse(Path::new(&payload.file.storage_path), &output_dir)
            .await?;

        let structure = FileStructure::from_parsed(file.id, &document);
        self.store.insert_file_structure(file.id, &structure).await?;
        Ok(structure)
    }

    async fn decompose(
        &self,
        ctx: &JobContext,
        payload: &FileJobPayload,
        file: &FileRecord,
    ) -> PipelineResult<()> {
        if file.status == FileStatus::Error {
            self.store
                .set_file_status(file.id, FileStatus::Processing)
                .await?;
        }

        let structure = self.structure_for(ctx, payload, file).await?;

        let mut groups = 0;
        for (_slide, texts) in structure.texts_by_slide() {
            for chunk in texts.chunks(self.chunk_size) {
                self.submitter
                    .submit_translation_group(TranslationGroupPayload {
                        user_id: payload.user_id.clone(),
                        batch_job_id: payload.batch_job_id,
                        file_id: file.id,
                        texts: chunk
                            .iter()
                            .map(|text| TextItem {
                                text_id: text.id,
                                text: text.content.clone(),
                            })
                            .collect(),
                        options: payload.options.clone(),
                    })
                    .await?;
                groups += 1;
            }
        }

        ctx.report_progress(json!({ "status": READY_MARKER, "groups": groups }))
            .await?;
        self.store.set_file_status(file.id, FileStatus::Ready).await?;

        info!(
            file_id = %file.id,
            slides = structure.slides.len(),
            texts = structure.texts.len(),
            translation_groups = groups,
            "File decomposed"
        );
        Ok(())
    }
}

fn reached_ready(previous: Option<&Value>) -> bool {
    previous
        .and_then(|progress| progress.get("status"))
        .and_then(Value::as_str)
        == Some(READY_MARKER)
}

#[async_trait]
impl JobHandler for FileDecompositionHandler {
    type Payload = FileJobPayload;

    fn stage(&self) -> PipelineStage {
        PipelineStage::FileProcessing
    }

    #[instrument(
        skip(self, ctx, payload),
        fields(batch_job_id = %payload.batch_job_id, file_name = %payload.file.name, attempt = ctx.attempt)
    )]
    async fn handle(&self, ctx: &JobContext, payload: FileJobPayload) -> PipelineResult<()> {
        let batch = self
            .store
            .find_batch_job(payload.batch_job_id)
            .await?
            .ok_or(PipelineError::BatchNotFound(payload.batch_job_id))?;
        if batch.status == BatchStatus::Cancelled {
            info!(batch_job_id = %batch.id, "Batch cancelled, skipping file");
            return Ok(());
        }

        let existing = self
            .store
            .find_file_for_source(payload.batch_job_id, &payload.file.storage_path)
            .await?;

        if let Some(file) = existing.as_ref().filter(|f| f.status == FileStatus::Ready) {
            // An earlier execution of this job got as far as READY but did
            // not get to count the file.
            if reached_ready(ctx.previous_progress()) {
                self.aggregator
                    .update_progress(payload.batch_job_id, 1, 0)
                    .await?;
            } else {
                debug!(file_id = %file.id, "File already decomposed");
            }
            return Ok(());
        }

        let file = match existing {
            Some(file) => file,
            None => self.register_file(&payload).await?,
        };

        let claimed = self
            .store
            .claim_file(file.id, ctx.job_id, ctx.timeout + VISIBILITY_GRACE)
            .await?;
        if !claimed {
            info!(file_id = %file.id, job_id = %ctx.job_id, "File claimed by another job, skipping");
            return Ok(());
        }

        if let Err(e) = self.decompose(ctx, &payload, &file).await {
            if let Err(status_err) = self.store.set_file_status(file.id, FileStatus::Error).await {
                error!(file_id = %file.id, error = %status_err, "Failed to mark file as ERROR");
            }
            return Err(e);
        }

        self.aggregator
            .update_progress(payload.batch_job_id, 1, 0)
            .await?;
        Ok(())
    }

    async fn on_exhausted(
        &self,
        payload: &FileJobPayload,
        error: &PipelineError,
    ) -> PipelineResult<()> {
        if matches!(error, PipelineError::BatchNotFound(_)) {
            return Ok(());
        }
        self.aggregator
            .record_file_failure(
                payload.batch_job_id,
                FileFailure::new(payload.file.name.clone(), error.to_string()),
            )
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_marker_detection() {
        assert!(reached_ready(Some(&json!({"status": "ready", "groups": 2}))));
        assert!(!reached_ready(Some(&json!({"status": "parsing"}))));
        assert!(!reached_ready(None));
    }
}
