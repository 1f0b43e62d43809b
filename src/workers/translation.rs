//! # Translation Worker
//!
//! Translates one group of texts. A text-level backend error does not fail
//! the group: its record gets an inline error marker and the loop moves on.
//! Anything else (missing language codes, store or backend outages, the job
//! timeout) fails the group. Once the group is permanently failed it leaves
//! a FAILED history record and an entry in the batch's `errorDetails`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::context::JobContext;
use super::handler::JobHandler;
use crate::collaborators::TranslationBackend;
use crate::constants::translation::error_marker;
use crate::error::{ErrorSeverity, PipelineError, PipelineResult};
use crate::models::{
    HistoryStatus, TranslationFailure, TranslationGroupPayload, TranslationHistoryRecord,
    TranslationRecord,
};
use crate::orchestration::ProgressAggregator;
use crate::queues::PipelineStage;
use crate::store::RecordStore;

#[derive(Debug, Clone)]
pub struct TranslationHandler {
    store: Arc<dyn RecordStore>,
    aggregator: ProgressAggregator,
    backend: Arc<dyn TranslationBackend>,
    default_model: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct GroupCounts {
    translated: i32,
    failed: i32,
}

impl TranslationHandler {
    pub fn new(
        store: Arc<dyn RecordStore>,
        aggregator: ProgressAggregator,
        backend: Arc<dyn TranslationBackend>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            store,
            aggregator,
            backend,
            default_model: default_model.into(),
        }
    }

    fn model_for(&self, payload: &TranslationGroupPayload) -> String {
        payload
            .options
            .model
            .clone()
            .unwrap_or_else(|| self.default_model.clone())
    }

    fn history(
        &self,
        payload: &TranslationGroupPayload,
        model: &str,
        counts: GroupCounts,
        started: Instant,
        status: HistoryStatus,
        error_message: Option<String>,
    ) -> TranslationHistoryRecord {
        let text_count = payload.texts.len() as i32;
        // One credit per text sent to the backend
        let credits_used = match status {
            HistoryStatus::Completed => text_count,
            HistoryStatus::Failed => 0,
        };
        TranslationHistoryRecord {
            id: Uuid::new_v4(),
            user_id: payload.user_id.clone(),
            batch_job_id: payload.batch_job_id,
            file_id: payload.file_id,
            source_lang: payload.options.source_lang.clone(),
            target_lang: payload.options.target_lang.clone(),
            model: model.to_string(),
            text_count,
            translated_count: counts.translated,
            failed_count: counts.failed,
            credits_used,
            processing_time_ms: started.elapsed().as_millis() as i64,
            status,
            error_message,
            created_at: Utc::now(),
        }
    }

    /// A retried group skips texts that already have a real translation
    async fn already_translated(
        &self,
        ctx: &JobContext,
        text_id: Uuid,
        target_lang: &str,
    ) -> PipelineResult<bool> {
        if ctx.attempt <= 1 {
            return Ok(false);
        }
        Ok(self
            .store
            .find_translation(text_id, target_lang)
            .await?
            .is_some_and(|record| !record.is_error_marker()))
    }
}

#[async_trait]
impl JobHandler for TranslationHandler {
    type Payload = TranslationGroupPayload;

    fn stage(&self) -> PipelineStage {
        PipelineStage::Translation
    }

    #[instrument(
        skip(self, ctx, payload),
        fields(file_id = %payload.file_id, texts = payload.texts.len(), attempt = ctx.attempt)
    )]
    async fn handle(&self, ctx: &JobContext, payload: TranslationGroupPayload) -> PipelineResult<()> {
        let started = Instant::now();
        let model = self.model_for(&payload);
        let source_lang = payload.options.source_lang.as_str();
        let target_lang = payload.options.target_lang.as_str();

        if source_lang.trim().is_empty() || target_lang.trim().is_empty() {
            return Err(PipelineError::InvalidTranslationOptions(
                "source and target language are required".to_string(),
            ));
        }

        let total = payload.texts.len();
        let mut counts = GroupCounts::default();
        for (index, item) in payload.texts.iter().enumerate() {
            ctx.report_progress(json!({ "processedTexts": index, "totalTexts": total }))
                .await?;

            if self
                .already_translated(ctx, item.text_id, target_lang)
                .await?
            {
                counts.translated += 1;
                continue;
            }

            let translation = match self
                .backend
                .translate(&item.text, source_lang, target_lang, &model)
                .await
            {
                Ok(translated) => {
                    counts.translated += 1;
                    translated
                }
                Err(e) if e.severity() == ErrorSeverity::TextLevel => {
                    warn!(text_id = %item.text_id, error = %e, "Text translation failed, recording marker");
                    counts.failed += 1;
                    error_marker(&e.to_string())
                }
                Err(e) => return Err(e),
            };

            self.store
                .upsert_translation(&TranslationRecord::new(
                    item.text_id,
                    payload.file_id,
                    source_lang,
                    target_lang,
                    model.as_str(),
                    translation,
                ))
                .await?;
        }
        ctx.report_progress(json!({ "processedTexts": total, "totalTexts": total }))
            .await?;

        let record = self.history(
            &payload,
            &model,
            counts,
            started,
            HistoryStatus::Completed,
            None,
        );
        self.store.insert_translation_history(&record).await?;

        info!(
            file_id = %payload.file_id,
            translated = counts.translated,
            failed = counts.failed,
            processing_time_ms = record.processing_time_ms,
            "Translation group finished"
        );
        Ok(())
    }

    async fn on_exhausted(
        &self,
        payload: &TranslationGroupPayload,
        error: &PipelineError,
    ) -> PipelineResult<()> {
        let record = self.history(
            payload,
            &self.model_for(payload),
            GroupCounts::default(),
            Instant::now(),
            HistoryStatus::Failed,
            Some(error.to_string()),
        );
        self.store.insert_translation_history(&record).await?;

        self.aggregator
            .record_translation_failure(
                payload.batch_job_id,
                TranslationFailure::new(payload.file_id, record.text_count, error.to_string()),
            )
            .await
            .map(|_| ())
    }
}
