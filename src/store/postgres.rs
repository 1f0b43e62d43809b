//! # PostgreSQL Record Store
//!
//! `sqlx` implementation of [`RecordStore`] over the `pipeline_*` tables.
//!
//! Batch mutations are single `UPDATE ... FROM (SELECT ... FOR UPDATE)`
//! statements: the subquery takes the row lock and captures the previous
//! status, the `SET` clause does the clamped arithmetic, and `RETURNING`
//! hands back the new row. Two workers finishing the last files of a batch at
//! the same moment are serialized on the row lock, so only one of them sees
//! the transition into COMPLETED.

use async_trait::async_trait;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::RecordStore;
use crate::config::DatabaseConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::models::{
    BatchErrorEntry, BatchJob, BatchProgressDelta, BatchTransition, FileRecord, FileStatus,
    FileStructure, HistoryStatus, SlideRecord, TextPosition, TextRecord,
    TranslationHistoryRecord, TranslationRecord,
};

/// Migrations for the pipeline tables (and the pgmq extension)
pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

const BATCH_COLUMNS: &str = "b.id, b.user_id, b.status, b.total_files, b.processed_files, \
     b.failed_files, b.error_details, b.files, b.options, b.created_at, b.started_at, \
     b.completed_at";

const FILE_COLUMNS: &str =
    "id, batch_job_id, user_id, original_name, storage_path, status, size, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(config: &DatabaseConfig) -> PipelineResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
            .connect(&config.url)
            .await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> PipelineResult<()> {
        MIGRATOR
            .run(&self.pool)
            .await
            .map_err(|e| PipelineError::Database(format!("migration failed: {e}")))
    }

    fn batch_from_row(row: &PgRow) -> PipelineResult<BatchJob> {
        let status: String = row.try_get("status")?;
        let error_details: serde_json::Value = row.try_get("error_details")?;
        let files: serde_json::Value = row.try_get("files")?;
        let options: serde_json::Value = row.try_get("options")?;
        Ok(BatchJob {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            status: status.parse()?,
            total_files: row.try_get("total_files")?,
            processed_files: row.try_get("processed_files")?,
            failed_files: row.try_get("failed_files")?,
            error_details: serde_json::from_value(error_details)?,
            files: serde_json::from_value(files)?,
            options: serde_json::from_value(options)?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn transition_from_row(row: &PgRow) -> PipelineResult<BatchTransition> {
        let previous: String = row.try_get("previous_status")?;
        Ok(BatchTransition {
            batch: Self::batch_from_row(row)?,
            previous_status: previous.parse()?,
        })
    }

    fn file_from_row(row: &PgRow) -> PipelineResult<FileRecord> {
        let status: String = row.try_get("status")?;
        Ok(FileRecord {
            id: row.try_get("id")?,
            batch_job_id: row.try_get("batch_job_id")?,
            user_id: row.try_get("user_id")?,
            original_name: row.try_get("original_name")?,
            storage_path: row.try_get("storage_path")?,
            status: status.parse()?,
            size: row.try_get("size")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn translation_from_row(row: &PgRow) -> PipelineResult<TranslationRecord> {
        Ok(TranslationRecord {
            id: row.try_get("id")?,
            text_id: row.try_get("text_id")?,
            file_id: row.try_get("file_id")?,
            source_lang: row.try_get("source_lang")?,
            target_lang: row.try_get("target_lang")?,
            model: row.try_get("model")?,
            translation: row.try_get("translation")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn history_from_row(row: &PgRow) -> PipelineResult<TranslationHistoryRecord> {
        let status: String = row.try_get("status")?;
        Ok(TranslationHistoryRecord {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            batch_job_id: row.try_get("batch_job_id")?,
            file_id: row.try_get("file_id")?,
            source_lang: row.try_get("source_lang")?,
            target_lang: row.try_get("target_lang")?,
            model: row.try_get("model")?,
            text_count: row.try_get("text_count")?,
            translated_count: row.try_get("translated_count")?,
            failed_count: row.try_get("failed_count")?,
            credits_used: row.try_get("credits_used")?,
            processing_time_ms: row.try_get("processing_time_ms")?,
            status: status.parse::<HistoryStatus>()?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
        })
    }

    /// Tell a missing batch apart from a batch in the wrong state
    async fn rejected_transition(
        &self,
        batch_job_id: Uuid,
        operation: &str,
    ) -> PipelineResult<BatchTransition> {
        match self.find_batch_job(batch_job_id).await? {
            Some(batch) => Err(PipelineError::invalid_transition(
                batch_job_id,
                batch.status,
                operation,
            )),
            None => Err(PipelineError::BatchNotFound(batch_job_id)),
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn create_batch_job(&self, batch: &BatchJob) -> PipelineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_batch_jobs
                (id, user_id, status, total_files, processed_files, failed_files,
                 error_details, files, options, created_at, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(batch.id)
        .bind(&batch.user_id)
        .bind(batch.status.as_str())
        .bind(batch.total_files)
        .bind(batch.processed_files)
        .bind(batch.failed_files)
        .bind(serde_json::to_value(&batch.error_details)?)
        .bind(serde_json::to_value(&batch.files)?)
        .bind(serde_json::to_value(&batch.options)?)
        .bind(batch.created_at)
        .bind(batch.started_at)
        .bind(batch.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_batch_job(&self, batch_job_id: Uuid) -> PipelineResult<Option<BatchJob>> {
        let sql = format!("SELECT {BATCH_COLUMNS} FROM pipeline_batch_jobs b WHERE b.id = $1");
        let row = sqlx::query(&sql)
            .bind(batch_job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::batch_from_row).transpose()
    }

    async fn mark_batch_started(&self, batch_job_id: Uuid) -> PipelineResult<BatchTransition> {
        let sql = format!(
            r#"
            UPDATE pipeline_batch_jobs AS b
            SET status = CASE WHEN b.status = 'PENDING' THEN 'PROCESSING' ELSE b.status END,
                started_at = CASE WHEN b.status = 'PENDING' THEN NOW() ELSE b.started_at END
            FROM (
                SELECT id, status AS previous_status
                FROM pipeline_batch_jobs WHERE id = $1 FOR UPDATE
            ) AS cur
            WHERE b.id = cur.id
            RETURNING {BATCH_COLUMNS}, cur.previous_status
            "#
        );
        let row = sqlx::query(&sql)
            .bind(batch_job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PipelineError::BatchNotFound(batch_job_id))?;
        Self::transition_from_row(&row)
    }

    async fn cancel_batch_job(&self, batch_job_id: Uuid) -> PipelineResult<BatchTransition> {
        let sql = format!(
            r#"
            UPDATE pipeline_batch_jobs AS b
            SET status = 'CANCELLED',
                completed_at = NOW()
            FROM (
                SELECT id, status AS previous_status
                FROM pipeline_batch_jobs WHERE id = $1 FOR UPDATE
            ) AS cur
            WHERE b.id = cur.id
              AND cur.previous_status NOT IN ('COMPLETED', 'FAILED', 'CANCELLED')
            RETURNING {BATCH_COLUMNS}, cur.previous_status
            "#
        );
        match sqlx::query(&sql)
            .bind(batch_job_id)
            .fetch_optional(&self.pool)
            .await?
        {
            Some(row) => Self::transition_from_row(&row),
            None => self.rejected_transition(batch_job_id, "cancel").await,
        }
    }

    #[instrument(skip(self, delta), fields(processed = delta.processed, failed = delta.failed))]
    async fn apply_batch_progress(
        &self,
        batch_job_id: Uuid,
        delta: &BatchProgressDelta,
    ) -> PipelineResult<BatchTransition> {
        let entry = delta.error.as_ref().map(serde_json::to_value).transpose()?;
        let sql = format!(
            r#"
            UPDATE pipeline_batch_jobs AS b
            SET processed_files = cur.new_processed,
                failed_files = cur.new_failed,
                error_details = CASE
                    WHEN $4::jsonb IS NULL THEN b.error_details
                    ELSE b.error_details || jsonb_build_array($4::jsonb)
                END,
                status = CASE
                    WHEN b.status IN ('FAILED', 'CANCELLED') THEN b.status
                    WHEN cur.new_processed + cur.new_failed >= b.total_files THEN 'COMPLETED'
                    ELSE 'PROCESSING'
                END,
                completed_at = CASE
                    WHEN b.status NOT IN ('FAILED', 'CANCELLED')
                         AND cur.new_processed + cur.new_failed >= b.total_files
                    THEN COALESCE(b.completed_at, NOW())
                    ELSE b.completed_at
                END
            FROM (
                SELECT locked.id,
                       locked.previous_status,
                       locked.new_processed,
                       GREATEST(
                           LEAST(locked.failed_files + $3, locked.total_files - locked.new_processed),
                           0
                       ) AS new_failed
                FROM (
                    SELECT id,
                           status AS previous_status,
                           total_files,
                           failed_files,
                           LEAST(processed_files + $2, total_files) AS new_processed
                    FROM pipeline_batch_jobs
                    WHERE id = $1
                    FOR UPDATE
                ) AS locked
            ) AS cur
            WHERE b.id = cur.id
            RETURNING {BATCH_COLUMNS}, cur.previous_status
            "#
        );

        let row = sqlx::query(&sql)
            .bind(batch_job_id)
            .bind(delta.processed.max(0))
            .bind(delta.failed.max(0))
            .bind(entry)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PipelineError::BatchNotFound(batch_job_id))?;

        let transition = Self::transition_from_row(&row)?;
        debug!(
            batch_job_id = %batch_job_id,
            previous = %transition.previous_status,
            status = %transition.batch.status,
            "Batch progress applied"
        );
        Ok(transition)
    }

    async fn mark_batch_failed(
        &self,
        batch_job_id: Uuid,
        entry: &BatchErrorEntry,
    ) -> PipelineResult<BatchTransition> {
        let sql = format!(
            r#"
            UPDATE pipeline_batch_jobs AS b
            SET status = 'FAILED',
                error_details = b.error_details || jsonb_build_array($2::jsonb),
                completed_at = COALESCE(b.completed_at, NOW())
            FROM (
                SELECT id, status AS previous_status
                FROM pipeline_batch_jobs WHERE id = $1 FOR UPDATE
            ) AS cur
            WHERE b.id = cur.id
            RETURNING {BATCH_COLUMNS}, cur.previous_status
            "#
        );
        let row = sqlx::query(&sql)
            .bind(batch_job_id)
            .bind(serde_json::to_value(entry)?)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(PipelineError::BatchNotFound(batch_job_id))?;
        Self::transition_from_row(&row)
    }

    async fn find_file_for_source(
        &self,
        batch_job_id: Uuid,
        storage_path: &str,
    ) -> PipelineResult<Option<FileRecord>> {
        let sql = format!(
            "SELECT {FILE_COLUMNS} FROM pipeline_files WHERE batch_job_id = $1 AND storage_path = $2"
        );
        let row = sqlx::query(&sql)
            .bind(batch_job_id)
            .bind(storage_path)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::file_from_row).transpose()
    }

    async fn find_file_record(&self, file_id: Uuid) -> PipelineResult<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM pipeline_files WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(Self::file_from_row).transpose()
    }

    async fn create_file_record(&self, record: &FileRecord) -> PipelineResult<FileRecord> {
        let sql = format!(
            r#"
            INSERT INTO pipeline_files
                (id, batch_job_id, user_id, original_name, storage_path, status, size,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (batch_job_id, storage_path) DO NOTHING
            RETURNING {FILE_COLUMNS}
            "#
        );
        let inserted = sqlx::query(&sql)
            .bind(record.id)
            .bind(record.batch_job_id)
            .bind(&record.user_id)
            .bind(&record.original_name)
            .bind(&record.storage_path)
            .bind(record.status.as_str())
            .bind(record.size)
            .bind(record.created_at)
            .bind(record.updated_at)
            .fetch_optional(&self.pool)
            .await?;

        match inserted {
            Some(row) => Self::file_from_row(&row),
            None => self
                .find_file_for_source(record.batch_job_id, &record.storage_path)
                .await?
                .ok_or_else(|| {
                    PipelineError::Database(format!(
                        "file record for {} vanished after conflict",
                        record.storage_path
                    ))
                }),
        }
    }

    async fn set_file_status(&self, file_id: Uuid, status: FileStatus) -> PipelineResult<()> {
        let result =
            sqlx::query("UPDATE pipeline_files SET status = $2, updated_at = NOW() WHERE id = $1")
                .bind(file_id)
                .bind(status.as_str())
                .execute(&self.pool)
                .await?;
        if result.rows_affected() == 0 {
            return Err(PipelineError::Database(format!(
                "file record {file_id} not found"
            )));
        }
        Ok(())
    }

    async fn claim_file(
        &self,
        file_id: Uuid,
        claim_token: Uuid,
        stale_after: Duration,
    ) -> PipelineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE pipeline_files
            SET claim_token = $2, claimed_at = NOW(), updated_at = NOW()
            WHERE id = $1
              AND (claim_token IS NULL
                   OR claim_token = $2
                   OR claimed_at <= NOW() - make_interval(secs => $3))
            "#,
        )
        .bind(file_id)
        .bind(claim_token)
        .bind(stale_after.as_secs_f64())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }
        if self.find_file_record(file_id).await?.is_none() {
            return Err(PipelineError::Database(format!(
                "file record {file_id} not found"
            )));
        }
        debug!(file_id = %file_id, "File claimed by another job");
        Ok(false)
    }

    #[instrument(skip(self, structure), fields(slides = structure.slides.len(), texts = structure.texts.len()))]
    async fn insert_file_structure(
        &self,
        file_id: Uuid,
        structure: &FileStructure,
    ) -> PipelineResult<()> {
        let mut tx = self.pool.begin().await?;

        // texts cascade with their slides
        sqlx::query("DELETE FROM pipeline_slides WHERE file_id = $1")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;

        let slide_ids: Vec<Uuid> = structure.slides.iter().map(|s| s.id).collect();
        let slide_indexes: Vec<i32> = structure.slides.iter().map(|s| s.slide_index).collect();
        let image_paths: Vec<String> = structure
            .slides
            .iter()
            .map(|s| s.image_path.clone())
            .collect();
        sqlx::query(
            r#"
            INSERT INTO pipeline_slides (id, file_id, slide_index, image_path)
            SELECT id, $2, slide_index, image_path
            FROM UNNEST($1::uuid[], $3::int4[], $4::text[]) AS s(id, slide_index, image_path)
            "#,
        )
        .bind(&slide_ids)
        .bind(file_id)
        .bind(&slide_indexes)
        .bind(&image_paths)
        .execute(&mut *tx)
        .await?;

        let texts = &structure.texts;
        let text_ids: Vec<Uuid> = texts.iter().map(|t| t.id).collect();
        let text_slide_ids: Vec<Uuid> = texts.iter().map(|t| t.slide_id).collect();
        let text_indexes: Vec<i32> = texts.iter().map(|t| t.text_index).collect();
        let contents: Vec<String> = texts.iter().map(|t| t.content.clone()).collect();
        let xs: Vec<f64> = texts.iter().map(|t| t.position.x).collect();
        let ys: Vec<f64> = texts.iter().map(|t| t.position.y).collect();
        let widths: Vec<f64> = texts.iter().map(|t| t.position.width).collect();
        let heights: Vec<f64> = texts.iter().map(|t| t.position.height).collect();
        sqlx::query(
            r#"
            INSERT INTO pipeline_texts
                (id, slide_id, file_id, text_index, content, pos_x, pos_y, pos_width, pos_height)
            SELECT id, slide_id, $3, text_index, content, pos_x, pos_y, pos_width, pos_height
            FROM UNNEST($1::uuid[], $2::uuid[], $4::int4[], $5::text[],
                        $6::float8[], $7::float8[], $8::float8[], $9::float8[])
                AS t(id, slide_id, text_index, content, pos_x, pos_y, pos_width, pos_height)
            "#,
        )
        .bind(&text_ids)
        .bind(&text_slide_ids)
        .bind(file_id)
        .bind(&text_indexes)
        .bind(&contents)
        .bind(&xs)
        .bind(&ys)
        .bind(&widths)
        .bind(&heights)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_file_structure(&self, file_id: Uuid) -> PipelineResult<FileStructure> {
        let slide_rows = sqlx::query(
            "SELECT id, file_id, slide_index, image_path FROM pipeline_slides \
             WHERE file_id = $1 ORDER BY slide_index",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        let text_rows = sqlx::query(
            "SELECT t.id, t.slide_id, t.file_id, t.text_index, t.content, \
                    t.pos_x, t.pos_y, t.pos_width, t.pos_height \
             FROM pipeline_texts t JOIN pipeline_slides s ON s.id = t.slide_id \
             WHERE t.file_id = $1 ORDER BY s.slide_index, t.text_index",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;

        let slides = slide_rows
            .iter()
            .map(|row| -> PipelineResult<SlideRecord> {
                Ok(SlideRecord {
                    id: row.try_get("id")?,
                    file_id: row.try_get("file_id")?,
                    slide_index: row.try_get("slide_index")?,
                    image_path: row.try_get("image_path")?,
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;
        let texts = text_rows
            .iter()
            .map(|row| -> PipelineResult<TextRecord> {
                Ok(TextRecord {
                    id: row.try_get("id")?,
                    slide_id: row.try_get("slide_id")?,
                    file_id: row.try_get("file_id")?,
                    text_index: row.try_get("text_index")?,
                    content: row.try_get("content")?,
                    position: TextPosition {
                        x: row.try_get("pos_x")?,
                        y: row.try_get("pos_y")?,
                        width: row.try_get("pos_width")?,
                        height: row.try_get("pos_height")?,
                    },
                })
            })
            .collect::<PipelineResult<Vec<_>>>()?;

        Ok(FileStructure { slides, texts })
    }

    async fn upsert_translation(&self, record: &TranslationRecord) -> PipelineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_translations
                (id, text_id, file_id, source_lang, target_lang, model, translation, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (text_id, target_lang) DO UPDATE
            SET translation = EXCLUDED.translation,
                model = EXCLUDED.model,
                source_lang = EXCLUDED.source_lang,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&record.id)
        .bind(record.text_id)
        .bind(record.file_id)
        .bind(&record.source_lang)
        .bind(&record.target_lang)
        .bind(&record.model)
        .bind(&record.translation)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_translation(
        &self,
        text_id: Uuid,
        target_lang: &str,
    ) -> PipelineResult<Option<TranslationRecord>> {
        let row = sqlx::query(
            "SELECT id, text_id, file_id, source_lang, target_lang, model, translation, updated_at \
             FROM pipeline_translations WHERE text_id = $1 AND target_lang = $2",
        )
        .bind(text_id)
        .bind(target_lang)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(Self::translation_from_row).transpose()
    }

    async fn insert_translation_history(
        &self,
        record: &TranslationHistoryRecord,
    ) -> PipelineResult<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_translation_history
                (id, user_id, batch_job_id, file_id, source_lang, target_lang, model,
                 text_count, translated_count, failed_count, credits_used,
                 processing_time_ms, status, error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(record.id)
        .bind(&record.user_id)
        .bind(record.batch_job_id)
        .bind(record.file_id)
        .bind(&record.source_lang)
        .bind(&record.target_lang)
        .bind(&record.model)
        .bind(record.text_count)
        .bind(record.translated_count)
        .bind(record.failed_count)
        .bind(record.credits_used)
        .bind(record.processing_time_ms)
        .bind(record.status.as_str())
        .bind(&record.error_message)
        .bind(record.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_translation_history(
        &self,
        file_id: Uuid,
    ) -> PipelineResult<Vec<TranslationHistoryRecord>> {
        let rows = sqlx::query(
            "SELECT id, user_id, batch_job_id, file_id, source_lang, target_lang, model, \
                    text_count, translated_count, failed_count, credits_used, \
                    processing_time_ms, status, error_message, created_at \
             FROM pipeline_translation_history WHERE file_id = $1 ORDER BY created_at",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::history_from_row).collect()
    }
}
