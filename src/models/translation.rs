//! Translation results and the per-group history trail.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

/// Per-text result, unique on `(text_id, target_lang)`. Re-runs overwrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationRecord {
    pub id: String,
    pub text_id: Uuid,
    pub file_id: Uuid,
    pub source_lang: String,
    pub target_lang: String,
    pub model: String,
    /// Translated text, or an inline error marker
    pub translation: String,
    pub updated_at: DateTime<Utc>,
}

impl TranslationRecord {
    pub fn record_id(text_id: Uuid, target_lang: &str) -> String {
        format!("{text_id}_{target_lang}")
    }

    pub fn new(
        text_id: Uuid,
        file_id: Uuid,
        source_lang: impl Into<String>,
        target_lang: impl Into<String>,
        model: impl Into<String>,
        translation: impl Into<String>,
    ) -> Self {
        let target_lang = target_lang.into();
        Self {
            id: Self::record_id(text_id, &target_lang),
            text_id,
            file_id,
            source_lang: source_lang.into(),
            target_lang,
            model: model.into(),
            translation: translation.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn is_error_marker(&self) -> bool {
        crate::constants::translation::is_error_marker(&self.translation)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HistoryStatus {
    Completed,
    Failed,
}

impl HistoryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for HistoryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HistoryStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            other => Err(PipelineError::Database(format!(
                "unknown history status: {other}"
            ))),
        }
    }
}

/// Terminal, append-only summary of one translation group attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationHistoryRecord {
    pub id: Uuid,
    pub user_id: String,
    pub batch_job_id: Uuid,
    pub file_id: Uuid,
    pub source_lang: String,
    pub target_lang: String,
    pub model: String,
    pub text_count: i32,
    pub translated_count: i32,
    pub failed_count: i32,
    /// Billing unit: one credit per text sent to the backend
    pub credits_used: i32,
    pub processing_time_ms: i64,
    pub status: HistoryStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}
