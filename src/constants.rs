//! # Pipeline Constants
//!
//! Queue names and the documented job-policy defaults. The policy numbers are
//! part of the pipeline's contract; operators may override them through
//! configuration, but the defaults here must not drift.

use std::time::Duration;

/// Queue names, one per pipeline stage
pub mod queues {
    pub const BATCH_TRANSLATION: &str = "batch-translation";
    pub const FILE_PROCESSING: &str = "file-processing";
    pub const TRANSLATION: &str = "translation";

    pub const ALL: [&str; 3] = [BATCH_TRANSLATION, FILE_PROCESSING, TRANSLATION];
}

/// Job names carried in every envelope
pub mod job_names {
    pub const PROCESS_BATCH: &str = "process-batch";
    pub const PROCESS_FILE: &str = "process-file";
    pub const TRANSLATE_TEXTS: &str = "translate-texts";
}

/// Default job policy
pub mod policy {
    use super::Duration;

    pub const DEFAULT_ATTEMPTS: u32 = 3;
    pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(5);
    pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
    pub const DEFAULT_JOB_TIMEOUT: Duration = Duration::from_secs(30 * 60);
    /// Added to the job timeout when reserving a message, so a job that is
    /// still inside its timeout is never redelivered to a sibling worker
    pub const VISIBILITY_GRACE: Duration = Duration::from_secs(60);
}

/// Translation stage settings
pub mod translation {
    /// Texts per translation job
    pub const TEXT_CHUNK_SIZE: usize = 10;
    /// The translation backend is the rate-limited resource
    pub const WORKER_CONCURRENCY: usize = 2;
    pub const ERROR_MARKER_PREFIX: &str = "[translation-error: ";
    pub const DEFAULT_MODEL: &str = "claude-3-sonnet-20241022";

    /// Inline marker stored in place of a translation that failed
    pub fn error_marker(message: &str) -> String {
        format!("{ERROR_MARKER_PREFIX}{message}]")
    }

    pub fn is_error_marker(value: &str) -> bool {
        value.starts_with(ERROR_MARKER_PREFIX) && value.ends_with(']')
    }
}

/// Workspace layout
pub mod workspace {
    pub const DEFAULT_ROOT: &str = "/tmp";
    pub const USERS_DIR: &str = "users";
    pub const SLIDES_DIR: &str = "slides";
}
