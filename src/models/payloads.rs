//! Queue-carried job payloads.
//!
//! These are never persisted as entities of their own; they travel inside a
//! [`JobEnvelope`](crate::queues::JobEnvelope) and are consumed by one stage.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Name and source location of an uploaded file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileDescriptor {
    pub name: String,
    pub storage_path: String,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, storage_path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage_path: storage_path.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationOptions {
    pub source_lang: String,
    pub target_lang: String,
    /// Falls back to the configured default model
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TranslationOptions {
    pub fn new(source_lang: impl Into<String>, target_lang: impl Into<String>) -> Self {
        Self {
            source_lang: source_lang.into(),
            target_lang: target_lang.into(),
            model: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Orchestrator input: fan a batch out into file jobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJobPayload {
    pub batch_job_id: Uuid,
    pub user_id: String,
    pub files: Vec<FileDescriptor>,
    pub options: TranslationOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileJobPayload {
    pub user_id: String,
    pub batch_job_id: Uuid,
    pub file: FileDescriptor,
    pub options: TranslationOptions,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextItem {
    pub text_id: Uuid,
    pub text: String,
}

/// One chunk of a slide's texts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationGroupPayload {
    pub user_id: String,
    pub batch_job_id: Uuid,
    pub file_id: Uuid,
    pub texts: Vec<TextItem>,
    pub options: TranslationOptions,
}
