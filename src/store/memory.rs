//! In-process record store. Every operation runs under one lock, which makes
//! each call atomic with respect to the others.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::RecordStore;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    BatchErrorEntry, BatchJob, BatchProgressDelta, BatchStatus, BatchTransition, FileRecord,
    FileStatus, FileStructure, SlideRecord, TextRecord, TranslationHistoryRecord,
    TranslationRecord,
};

#[derive(Debug, Default)]
struct State {
    batches: HashMap<Uuid, BatchJob>,
    files: HashMap<Uuid, FileRecord>,
    /// file id -> (claim token, claimed at)
    claims: HashMap<Uuid, (Uuid, DateTime<Utc>)>,
    slides: HashMap<Uuid, Vec<SlideRecord>>,
    texts: HashMap<Uuid, Vec<TextRecord>>,
    translations: HashMap<(Uuid, String), TranslationRecord>,
    history: Vec<TranslationHistoryRecord>,
}

impl State {
    fn batch_mut(&mut self, batch_job_id: Uuid) -> PipelineResult<&mut BatchJob> {
        self.batches
            .get_mut(&batch_job_id)
            .ok_or(PipelineError::BatchNotFound(batch_job_id))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRecordStore {
    state: Mutex<State>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// File records belonging to a batch (for testing)
    pub fn files_for_batch(&self, batch_job_id: Uuid) -> Vec<FileRecord> {
        let state = self.state.lock();
        let mut files: Vec<FileRecord> = state
            .files
            .values()
            .filter(|file| file.batch_job_id == batch_job_id)
            .cloned()
            .collect();
        files.sort_by(|a, b| a.original_name.cmp(&b.original_name));
        files
    }

    /// Translations stored for a file (for testing)
    pub fn translations_for_file(&self, file_id: Uuid) -> Vec<TranslationRecord> {
        let state = self.state.lock();
        state
            .translations
            .values()
            .filter(|record| record.file_id == file_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn create_batch_job(&self, batch: &BatchJob) -> PipelineResult<()> {
        let mut state = self.state.lock();
        if state.batches.contains_key(&batch.id) {
            return Err(PipelineError::Database(format!(
                "batch job {} already exists",
                batch.id
            )));
        }
        state.batches.insert(batch.id, batch.clone());
        Ok(())
    }

    async fn find_batch_job(&self, batch_job_id: Uuid) -> PipelineResult<Option<BatchJob>> {
        Ok(self.state.lock().batches.get(&batch_job_id).cloned())
    }

    async fn mark_batch_started(&self, batch_job_id: Uuid) -> PipelineResult<BatchTransition> {
        let mut state = self.state.lock();
        let batch = state.batch_mut(batch_job_id)?;
        let previous_status = batch.status;
        if previous_status == BatchStatus::Pending {
            batch.status = BatchStatus::Processing;
            batch.started_at = Some(Utc::now());
        }
        Ok(BatchTransition {
            batch: batch.clone(),
            previous_status,
        })
    }

    async fn cancel_batch_job(&self, batch_job_id: Uuid) -> PipelineResult<BatchTransition> {
        let mut state = self.state.lock();
        let batch = state.batch_mut(batch_job_id)?;
        let previous_status = batch.status;
        if previous_status.is_terminal() {
            return Err(PipelineError::invalid_transition(
                batch_job_id,
                previous_status,
                "cancel",
            ));
        }
        batch.status = BatchStatus::Cancelled;
        batch.completed_at = Some(Utc::now());
        Ok(BatchTransition {
            batch: batch.clone(),
            previous_status,
        })
    }

    async fn apply_batch_progress(
        &self,
        batch_job_id: Uuid,
        delta: &BatchProgressDelta,
    ) -> PipelineResult<BatchTransition> {
        let mut state = self.state.lock();
        let batch = state.batch_mut(batch_job_id)?;
        let previous_status = batch.status;
        delta.apply(batch, Utc::now());
        Ok(BatchTransition {
            batch: batch.clone(),
            previous_status,
        })
    }

    async fn mark_batch_failed(
        &self,
        batch_job_id: Uuid,
        entry: &BatchErrorEntry,
    ) -> PipelineResult<BatchTransition> {
        let mut state = self.state.lock();
        let batch = state.batch_mut(batch_job_id)?;
        let previous_status = batch.status;
        batch.status = BatchStatus::Failed;
        batch.error_details.push(entry.clone());
        if batch.completed_at.is_none() {
            batch.completed_at = Some(Utc::now());
        }
        Ok(BatchTransition {
            batch: batch.clone(),
            previous_status,
        })
    }

    async fn find_file_for_source(
        &self,
        batch_job_id: Uuid,
        storage_path: &str,
    ) -> PipelineResult<Option<FileRecord>> {
        let state = self.state.lock();
        Ok(state
            .files
            .values()
            .find(|file| file.batch_job_id == batch_job_id && file.storage_path == storage_path)
            .cloned())
    }

    async fn find_file_record(&self, file_id: Uuid) -> PipelineResult<Option<FileRecord>> {
        Ok(self.state.lock().files.get(&file_id).cloned())
    }

    async fn create_file_record(&self, record: &FileRecord) -> PipelineResult<FileRecord> {
        let mut state = self.state.lock();
        if let Some(existing) = state.files.values().find(|file| {
            file.batch_job_id == record.batch_job_id && file.storage_path == record.storage_path
        }) {
            return Ok(existing.clone());
        }
        state.files.insert(record.id, record.clone());
        Ok(record.clone())
    }

    async fn set_file_status(&self, file_id: Uuid, status: FileStatus) -> PipelineResult<()> {
        let mut state = self.state.lock();
        let file = state.files.get_mut(&file_id).ok_or_else(|| {
            PipelineError::Database(format!("file record {file_id} not found"))
        })?;
        file.status = status;
        file.updated_at = Utc::now();
        Ok(())
    }

    async fn claim_file(
        &self,
        file_id: Uuid,
        claim_token: Uuid,
        stale_after: Duration,
    ) -> PipelineResult<bool> {
        let mut state = self.state.lock();
        if !state.files.contains_key(&file_id) {
            return Err(PipelineError::Database(format!(
                "file record {file_id} not found"
            )));
        }
        let now = Utc::now();
        let stale_after = chrono::Duration::from_std(stale_after)
            .map_err(|e| PipelineError::Internal(format!("claim window out of range: {e}")))?;
        let claimable = match state.claims.get(&file_id) {
            None => true,
            Some((token, claimed_at)) => {
                *token == claim_token || *claimed_at + stale_after <= now
            }
        };
        if claimable {
            state.claims.insert(file_id, (claim_token, now));
        }
        Ok(claimable)
    }

    async fn insert_file_structure(
        &self,
        file_id: Uuid,
        structure: &FileStructure,
    ) -> PipelineResult<()> {
        let mut state = self.state.lock();
        state.slides.insert(file_id, structure.slides.clone());
        state.texts.insert(file_id, structure.texts.clone());
        Ok(())
    }

    async fn load_file_structure(&self, file_id: Uuid) -> PipelineResult<FileStructure> {
        let state = self.state.lock();
        Ok(FileStructure {
            slides: state.slides.get(&file_id).cloned().unwrap_or_default(),
            texts: state.texts.get(&file_id).cloned().unwrap_or_default(),
        })
    }

    async fn upsert_translation(&self, record: &TranslationRecord) -> PipelineResult<()> {
        let mut state = self.state.lock();
        state.translations.insert(
            (record.text_id, record.target_lang.clone()),
            record.clone(),
        );
        Ok(())
    }

    async fn find_translation(
        &self,
        text_id: Uuid,
        target_lang: &str,
    ) -> PipelineResult<Option<TranslationRecord>> {
        let state = self.state.lock();
        Ok(state
            .translations
            .get(&(text_id, target_lang.to_string()))
            .cloned())
    }

    async fn insert_translation_history(
        &self,
        record: &TranslationHistoryRecord,
    ) -> PipelineResult<()> {
        self.state.lock().history.push(record.clone());
        Ok(())
    }

    async fn list_translation_history(
        &self,
        file_id: Uuid,
    ) -> PipelineResult<Vec<TranslationHistoryRecord>> {
        let state = self.state.lock();
        Ok(state
            .history
            .iter()
            .filter(|record| record.file_id == file_id)
            .cloned()
            .collect())
    }
}
