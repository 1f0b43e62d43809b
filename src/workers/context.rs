//! Per-execution job context handed to stage handlers.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use uuid::Uuid;

use crate::error::PipelineResult;
use crate::messaging::MessagingProvider;
use crate::queues::{JobEnvelope, PipelineStage};

#[derive(Debug)]
pub struct JobContext {
    pub job_id: Uuid,
    pub stage: PipelineStage,
    /// 1-based execution number
    pub attempt: u32,
    pub max_attempts: u32,
    /// Execution limit from the job's policy
    pub timeout: Duration,
    queue: &'static str,
    previous_progress: Option<Value>,
    latest_progress: Mutex<Option<Value>>,
    provider: Arc<MessagingProvider>,
}

impl JobContext {
    pub fn new<T>(
        envelope: &JobEnvelope<T>,
        queue: &'static str,
        provider: Arc<MessagingProvider>,
    ) -> Self {
        Self {
            job_id: envelope.job_id,
            stage: envelope.stage,
            attempt: envelope.attempt(),
            max_attempts: envelope.policy.attempts,
            timeout: envelope.policy.timeout,
            queue,
            previous_progress: envelope.progress.clone(),
            latest_progress: Mutex::new(None),
            provider,
        }
    }

    /// Progress reported by the execution before this one, if it was retried
    pub fn previous_progress(&self) -> Option<&Value> {
        self.previous_progress.as_ref()
    }

    /// Record job progress with the queue backend. The latest value also
    /// travels with the envelope if this execution fails and is retried.
    pub async fn report_progress(&self, progress: Value) -> PipelineResult<()> {
        self.provider
            .record_progress(self.queue, self.job_id, &progress)
            .await?;
        *self.latest_progress.lock() = Some(progress);
        Ok(())
    }

    pub fn latest_progress(&self) -> Option<Value> {
        self.latest_progress.lock().clone()
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}
