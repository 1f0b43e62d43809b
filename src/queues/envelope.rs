//! Job envelope: the unit actually stored on a queue.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::policy::RetryPolicy;
use super::stage::PipelineStage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobEnvelope<T> {
    /// Stable across retries
    pub job_id: Uuid,
    pub stage: PipelineStage,
    pub name: String,
    /// Executions that already failed
    pub attempts_made: u32,
    pub policy: RetryPolicy,
    pub enqueued_at: DateTime<Utc>,
    #[serde(default)]
    pub last_error: Option<String>,
    /// Last progress value the handler reported before a retry
    #[serde(default)]
    pub progress: Option<serde_json::Value>,
    pub data: T,
}

impl<T> JobEnvelope<T> {
    pub fn new(stage: PipelineStage, data: T, policy: RetryPolicy) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            stage,
            name: stage.job_name().to_string(),
            attempts_made: 0,
            policy,
            enqueued_at: Utc::now(),
            last_error: None,
            progress: None,
            data,
        }
    }

    /// 1-based number of the execution this envelope is about to get
    pub fn attempt(&self) -> u32 {
        self.attempts_made + 1
    }

    pub fn is_final_attempt(&self) -> bool {
        !self.policy.allows_retry(self.attempt())
    }

    /// Envelope for the next execution after this one failed
    pub fn retried(&self, error: &str, progress: Option<serde_json::Value>) -> Self
    where
        T: Clone,
    {
        Self {
            job_id: self.job_id,
            stage: self.stage,
            name: self.name.clone(),
            attempts_made: self.attempts_made + 1,
            policy: self.policy,
            enqueued_at: Utc::now(),
            last_error: Some(error.to_string()),
            progress: progress.or_else(|| self.progress.clone()),
            data: self.data.clone(),
        }
    }
}
