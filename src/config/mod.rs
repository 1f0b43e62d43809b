//! # Pipeline Configuration
//!
//! Typed configuration for the queue backend, the job policy, the stage
//! worker pools and the external collaborators. Loaded by [`ConfigLoader`]
//! from layered TOML files and `PIPELINE__*` environment variables.
//!
//! ```toml
//! backend = "pgmq"
//!
//! [job_policy]
//! attempts = 3
//! backoff_base_ms = 5000
//!
//! [workers]
//! translation_concurrency = 2
//! ```

pub mod loader;

pub use loader::ConfigLoader;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{PipelineError, PipelineResult};

/// Queue backend selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueBackend {
    #[default]
    Pgmq,
    InMemory,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub backend: QueueBackend,
    pub database: DatabaseConfig,
    pub job_policy: JobPolicyConfig,
    pub workers: WorkerConfig,
    pub workspace: WorkspaceConfig,
    pub translation: TranslationConfig,
    pub parser: ParserConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_seconds: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 10,
            acquire_timeout_seconds: 30,
        }
    }
}

/// Job policy attached to every submission
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobPolicyConfig {
    pub attempts: u32,
    pub backoff_base_ms: u64,
    pub retention_seconds: u64,
    pub timeout_seconds: u64,
}

impl Default for JobPolicyConfig {
    fn default() -> Self {
        Self {
            attempts: constants::policy::DEFAULT_ATTEMPTS,
            backoff_base_ms: constants::policy::DEFAULT_BACKOFF_BASE.as_millis() as u64,
            retention_seconds: constants::policy::DEFAULT_RETENTION.as_secs(),
            timeout_seconds: constants::policy::DEFAULT_JOB_TIMEOUT.as_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub batch_concurrency: usize,
    pub file_concurrency: usize,
    /// Kept low; the translation backend is rate limited
    pub translation_concurrency: usize,
    pub poll_interval_ms: u64,
    pub shutdown_grace_seconds: u64,
    pub retention_sweep_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            batch_concurrency: 4,
            file_concurrency: 4,
            translation_concurrency: constants::translation::WORKER_CONCURRENCY,
            poll_interval_ms: 1000,
            shutdown_grace_seconds: 30,
            retention_sweep_interval_seconds: 3600,
        }
    }
}

impl WorkerConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }

    pub fn retention_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.retention_sweep_interval_seconds)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkspaceConfig {
    pub root: String,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root: constants::workspace::DEFAULT_ROOT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub default_model: String,
    pub chunk_size: usize,
    pub endpoint: String,
    pub request_timeout_seconds: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            default_model: constants::translation::DEFAULT_MODEL.to_string(),
            chunk_size: constants::translation::TEXT_CHUNK_SIZE,
            endpoint: "http://localhost:8080/translate".to_string(),
            request_timeout_seconds: 120,
        }
    }
}

/// External document parser invocation: `<command> <args...> <source> <output_dir>`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ParserConfig {
    pub command: String,
    pub args: Vec<String>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        Self {
            command: "pptx-parser".to_string(),
            args: Vec::new(),
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> PipelineResult<()> {
        if self.job_policy.attempts == 0 {
            return Err(PipelineError::Configuration(
                "job_policy.attempts must be at least 1".to_string(),
            ));
        }
        if self.job_policy.timeout_seconds == 0 {
            return Err(PipelineError::Configuration(
                "job_policy.timeout_seconds must be greater than 0".to_string(),
            ));
        }
        for (name, value) in [
            ("workers.batch_concurrency", self.workers.batch_concurrency),
            ("workers.file_concurrency", self.workers.file_concurrency),
            (
                "workers.translation_concurrency",
                self.workers.translation_concurrency,
            ),
        ] {
            if value == 0 {
                return Err(PipelineError::Configuration(format!(
                    "{name} must be greater than 0"
                )));
            }
        }
        if self.translation.chunk_size == 0 {
            return Err(PipelineError::Configuration(
                "translation.chunk_size must be greater than 0".to_string(),
            ));
        }
        if self.backend == QueueBackend::Pgmq && self.database.url.trim().is_empty() {
            return Err(PipelineError::Configuration(
                "database.url is required for the pgmq backend".to_string(),
            ));
        }
        Ok(())
    }

    /// Database URL with any password masked, for logging
    pub fn redacted_database_url(&self) -> String {
        let url = &self.database.url;
        match (url.find("://"), url.rfind('@')) {
            (Some(scheme_end), Some(at)) if at > scheme_end => {
                let credentials = &url[scheme_end + 3..at];
                match credentials.find(':') {
                    Some(colon) => format!(
                        "{}{}:***{}",
                        &url[..scheme_end + 3],
                        &credentials[..colon],
                        &url[at..]
                    ),
                    None => url.clone(),
                }
            }
            _ => url.clone(),
        }
    }
}
