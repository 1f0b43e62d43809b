//! # Batch Job Model
//!
//! One user submission and its completion counters.
//!
//! ## Database Schema
//!
//! Maps to `pipeline_batch_jobs`:
//! - `total_files`, `processed_files`, `failed_files`: INTEGER, with
//!   `CHECK (processed_files + failed_files <= total_files)`
//! - `error_details`: JSONB array, append-only
//! - `files`, `options`: JSONB, the submission as accepted
//!
//! Counters and status are mutated only through the progress aggregator.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::payloads::{FileDescriptor, TranslationOptions};
use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Statuses that counter updates never leave
    pub fn is_sticky(&self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BatchStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "PROCESSING" => Ok(Self::Processing),
            "COMPLETED" => Ok(Self::Completed),
            "FAILED" => Ok(Self::Failed),
            "CANCELLED" => Ok(Self::Cancelled),
            other => Err(PipelineError::Database(format!(
                "unknown batch status: {other}"
            ))),
        }
    }
}

/// A file that was permanently given up on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    pub file_name: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl FileFailure {
    pub fn new(file_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// The batch itself failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFailure {
    pub message: String,
    /// Error chain, the closest thing to a stack
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl BatchFailure {
    pub fn from_error(error: &PipelineError) -> Self {
        Self {
            message: error.to_string(),
            detail: error.detail(),
            timestamp: Utc::now(),
        }
    }
}

/// A translation group that was permanently given up on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranslationFailure {
    pub file_id: Uuid,
    pub text_count: i32,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl TranslationFailure {
    pub fn new(file_id: Uuid, text_count: i32, message: impl Into<String>) -> Self {
        Self {
            file_id,
            text_count,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Entry of a batch's append-only `errorDetails` list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchErrorEntry {
    FileFailure(FileFailure),
    BatchFailure(BatchFailure),
    TranslationFailure(TranslationFailure),
}

impl BatchErrorEntry {
    pub fn file_name(&self) -> Option<&str> {
        match self {
            Self::FileFailure(failure) => Some(&failure.file_name),
            Self::BatchFailure(_) | Self::TranslationFailure(_) => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::FileFailure(failure) => &failure.message,
            Self::BatchFailure(failure) => &failure.message,
            Self::TranslationFailure(failure) => &failure.message,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchJob {
    pub id: Uuid,
    pub user_id: String,
    pub status: BatchStatus,
    pub total_files: i32,
    pub processed_files: i32,
    pub failed_files: i32,
    pub error_details: Vec<BatchErrorEntry>,
    pub files: Vec<FileDescriptor>,
    pub options: TranslationOptions,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl BatchJob {
    pub fn accounted_files(&self) -> i32 {
        self.processed_files + self.failed_files
    }

    /// Completion percentage, rounded to the nearest integer
    pub fn progress_percent(&self) -> u8 {
        if self.total_files <= 0 {
            return 0;
        }
        let pct = (self.accounted_files() as f64 / self.total_files as f64 * 100.0).round();
        pct.clamp(0.0, 100.0) as u8
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

/// A batch accepted from the dashboard, before it has an id
#[derive(Debug, Clone)]
pub struct NewBatchJob {
    pub user_id: String,
    pub files: Vec<FileDescriptor>,
    pub options: TranslationOptions,
}

impl NewBatchJob {
    pub fn into_batch_job(self) -> BatchJob {
        BatchJob {
            id: Uuid::new_v4(),
            user_id: self.user_id,
            status: BatchStatus::Pending,
            total_files: self.files.len() as i32,
            processed_files: 0,
            failed_files: 0,
            error_details: Vec::new(),
            files: self.files,
            options: self.options,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }
}

/// Counter change applied atomically by the record store
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchProgressDelta {
    pub processed: i32,
    pub failed: i32,
    pub error: Option<BatchErrorEntry>,
}

impl BatchProgressDelta {
    pub fn processed(count: i32) -> Self {
        Self {
            processed: count,
            ..Self::default()
        }
    }

    /// No counter change, only an error entry
    pub fn error_only(entry: BatchErrorEntry) -> Self {
        Self {
            error: Some(entry),
            ..Self::default()
        }
    }

    pub fn file_failed(failure: FileFailure) -> Self {
        Self {
            processed: 0,
            failed: 1,
            error: Some(BatchErrorEntry::FileFailure(failure)),
        }
    }

    /// Apply to a batch in place: clamp, then derive the status.
    ///
    /// Stores that cannot run this code inside their atomic section must
    /// reproduce the same arithmetic.
    pub fn apply(&self, batch: &mut BatchJob, now: DateTime<Utc>) {
        let processed = (batch.processed_files + self.processed.max(0)).min(batch.total_files);
        let failed =
            (batch.failed_files + self.failed.max(0)).min(batch.total_files - processed);
        batch.processed_files = processed;
        batch.failed_files = failed.max(0);

        if let Some(entry) = &self.error {
            batch.error_details.push(entry.clone());
        }

        if batch.status.is_sticky() {
            return;
        }
        if batch.accounted_files() >= batch.total_files {
            batch.status = BatchStatus::Completed;
            if batch.completed_at.is_none() {
                batch.completed_at = Some(now);
            }
        } else {
            batch.status = BatchStatus::Processing;
        }
    }
}

/// Result of an atomic batch mutation
#[derive(Debug, Clone)]
pub struct BatchTransition {
    pub batch: BatchJob,
    pub previous_status: BatchStatus,
}

impl BatchTransition {
    /// True for exactly the one mutation that moved the batch into COMPLETED
    pub fn completed_now(&self) -> bool {
        self.previous_status != BatchStatus::Completed
            && self.batch.status == BatchStatus::Completed
    }

    pub fn failed_now(&self) -> bool {
        self.previous_status != BatchStatus::Failed && self.batch.status == BatchStatus::Failed
    }
}
