//! # File Record Model
//!
//! Durable record of one accepted source file. Created and transitioned only by
//! the file decomposition worker; everyone else reads it.
//!
//! `(batch_job_id, storage_path)` is unique and serves as the idempotency key
//! for redelivered file jobs.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FileStatus {
    Processing,
    Ready,
    Error,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "PROCESSING",
            Self::Ready => "READY",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PROCESSING" => Ok(Self::Processing),
            "READY" => Ok(Self::Ready),
            "ERROR" => Ok(Self::Error),
            other => Err(PipelineError::Database(format!(
                "unknown file status: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    pub id: Uuid,
    pub batch_job_id: Uuid,
    pub user_id: String,
    pub original_name: String,
    pub storage_path: String,
    pub status: FileStatus,
    pub size: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FileRecord {
    pub fn new(
        id: Uuid,
        batch_job_id: Uuid,
        user_id: impl Into<String>,
        original_name: impl Into<String>,
        storage_path: impl Into<String>,
        size: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            batch_job_id,
            user_id: user_id.into(),
            original_name: original_name.into(),
            storage_path: storage_path.into(),
            status: FileStatus::Processing,
            size,
            created_at: now,
            updated_at: now,
        }
    }
}
