//! Error types for the translation pipeline.
//!

use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::messaging::MessagingError;

/// Where an error sits in the pipeline's failure taxonomy.
///
/// The translation worker encodes text-level errors as inline markers and
/// fails the group on anything else. Stage workers log the severity of
/// every retried or failed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    /// I/O, store or queue hiccups; retried by the stage worker
    Transient,
    /// Parse or workspace failures owned by a single file job
    FileLevel,
    /// A single translation call failed
    TextLevel,
    /// The batch itself cannot be processed
    BatchFatal,
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Invalid stage: {0}")]
    InvalidStage(String),
    #[error("Batch job not found: {0}")]
    BatchNotFound(Uuid),
    #[error("Invalid batch request: {0}")]
    InvalidBatchRequest(String),
    #[error("Batch {batch_job_id} is {status}, cannot {operation}")]
    InvalidStateTransition {
        batch_job_id: Uuid,
        status: String,
        operation: String,
    },
    #[error("Failed to parse {file_name}: {message}")]
    Parse { file_name: String, message: String },
    #[error("Source file unavailable at {path}: {message}")]
    SourceFile { path: String, message: String },
    #[error("Workspace creation failed for {path}: {message}")]
    Workspace { path: String, message: String },
    #[error("Invalid translation options: {0}")]
    InvalidTranslationOptions(String),
    #[error("Translation failed: {0}")]
    Translation(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{stage} job timed out after {}s", .timeout.as_secs())]
    JobTimeout { stage: String, timeout: Duration },
    #[error("Internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn parse(file_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parse {
            file_name: file_name.into(),
            message: message.into(),
        }
    }

    pub fn workspace(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Workspace {
            path: path.into(),
            message: message.into(),
        }
    }

    pub fn invalid_transition(
        batch_job_id: Uuid,
        status: impl ToString,
        operation: impl Into<String>,
    ) -> Self {
        Self::InvalidStateTransition {
            batch_job_id,
            status: status.to_string(),
            operation: operation.into(),
        }
    }

    /// Whether the stage worker should schedule another attempt.
    ///
    /// Validation failures and missing records are deterministic; repeating
    /// them only burns attempts.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::InvalidStage(_)
                | Self::BatchNotFound(_)
                | Self::InvalidBatchRequest(_)
                | Self::InvalidStateTransition { .. }
                | Self::InvalidTranslationOptions(_)
                | Self::Serialization(_)
                | Self::Configuration(_)
        )
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::BatchNotFound(_) | Self::InvalidBatchRequest(_) => ErrorSeverity::BatchFatal,
            Self::Parse { .. } | Self::SourceFile { .. } | Self::Workspace { .. } => {
                ErrorSeverity::FileLevel
            }
            Self::Translation(_) => ErrorSeverity::TextLevel,
            _ => ErrorSeverity::Transient,
        }
    }

    /// Full error chain, used as the "stack" of a recorded failure.
    pub fn detail(&self) -> String {
        let mut detail = format!("{self:?}");
        let mut source = std::error::Error::source(self);
        while let Some(err) = source {
            detail.push_str("\ncaused by: ");
            detail.push_str(&err.to_string());
            source = err.source();
        }
        detail
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(err: sqlx::Error) -> Self {
        PipelineError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for PipelineError {
    fn from(err: config::ConfigError) -> Self {
        PipelineError::Configuration(err.to_string())
    }
}

pub type PipelineResult<T> = std::result::Result<T, PipelineError>;
