//! # Durable Record Store
//!
//! Persistence boundary for batches, files, slide/text structure, translations
//! and translation history. Shared by every stage as `Arc<dyn RecordStore>`.
//!
//! Batch counters are the only records mutated concurrently by several
//! workers, so every counter or status change is a single atomic store call
//! that returns the resulting [`BatchTransition`]; application code never
//! reads a batch, edits it and writes it back.

mod memory;
mod postgres;

pub use memory::InMemoryRecordStore;
pub use postgres::PgRecordStore;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::PipelineResult;
use crate::models::{
    BatchErrorEntry, BatchJob, BatchProgressDelta, BatchTransition, FileRecord, FileStatus,
    FileStructure, TranslationHistoryRecord, TranslationRecord,
};

#[async_trait]
pub trait RecordStore: Send + Sync + std::fmt::Debug {
    async fn create_batch_job(&self, batch: &BatchJob) -> PipelineResult<()>;

    async fn find_batch_job(&self, batch_job_id: Uuid) -> PipelineResult<Option<BatchJob>>;

    /// PENDING -> PROCESSING, stamping `started_at`. Other statuses are left alone.
    async fn mark_batch_started(&self, batch_job_id: Uuid) -> PipelineResult<BatchTransition>;

    /// Any non-terminal status -> CANCELLED, stamping `completed_at`.
    /// Fails with `InvalidStateTransition` for terminal batches.
    async fn cancel_batch_job(&self, batch_job_id: Uuid) -> PipelineResult<BatchTransition>;

    /// Atomically add counter deltas, append the optional error entry, and
    /// derive the new status (see [`BatchProgressDelta::apply`]).
    async fn apply_batch_progress(
        &self,
        batch_job_id: Uuid,
        delta: &BatchProgressDelta,
    ) -> PipelineResult<BatchTransition>;

    /// Atomically set FAILED, append `entry`, stamp `completed_at` if unset
    async fn mark_batch_failed(
        &self,
        batch_job_id: Uuid,
        entry: &BatchErrorEntry,
    ) -> PipelineResult<BatchTransition>;

    async fn find_file_for_source(
        &self,
        batch_job_id: Uuid,
        storage_path: &str,
    ) -> PipelineResult<Option<FileRecord>>;

    async fn find_file_record(&self, file_id: Uuid) -> PipelineResult<Option<FileRecord>>;

    /// Insert a file record. If one already exists for the same
    /// `(batch_job_id, storage_path)`, that record is returned instead.
    async fn create_file_record(&self, record: &FileRecord) -> PipelineResult<FileRecord>;

    async fn set_file_status(&self, file_id: Uuid, status: FileStatus) -> PipelineResult<()>;

    /// Atomically take ownership of a file's decomposition for `claim_token`.
    ///
    /// Returns true when the file was unclaimed, is already held by the same
    /// token, or its claim is older than `stale_after`; false while another
    /// token holds a live claim.
    async fn claim_file(
        &self,
        file_id: Uuid,
        claim_token: Uuid,
        stale_after: Duration,
    ) -> PipelineResult<bool>;

    /// Replace the file's slides and texts in one transaction: afterwards the
    /// file has exactly `structure`, never a partial or duplicated set.
    async fn insert_file_structure(
        &self,
        file_id: Uuid,
        structure: &FileStructure,
    ) -> PipelineResult<()>;

    async fn load_file_structure(&self, file_id: Uuid) -> PipelineResult<FileStructure>;

    /// Insert or overwrite the record keyed by `(text_id, target_lang)`
    async fn upsert_translation(&self, record: &TranslationRecord) -> PipelineResult<()>;

    async fn find_translation(
        &self,
        text_id: Uuid,
        target_lang: &str,
    ) -> PipelineResult<Option<TranslationRecord>>;

    async fn insert_translation_history(
        &self,
        record: &TranslationHistoryRecord,
    ) -> PipelineResult<()>;

    async fn list_translation_history(
        &self,
        file_id: Uuid,
    ) -> PipelineResult<Vec<TranslationHistoryRecord>>;
}
