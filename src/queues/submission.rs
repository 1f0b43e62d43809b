//! # Job Submission API
//!
//! Typed enqueue functions for each stage. Every submission is wrapped in a
//! [`JobEnvelope`] carrying the retry policy, so the policy travels with the
//! job rather than living in backend configuration.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::envelope::JobEnvelope;
use super::policy::RetryPolicy;
use super::registry::QueueRegistry;
use super::stage::PipelineStage;
use crate::error::PipelineResult;
use crate::messaging::MessageId;
use crate::models::{BatchJobPayload, FileJobPayload, TranslationGroupPayload};

/// Receipt for an enqueued job
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedJob {
    pub job_id: Uuid,
    pub message_id: MessageId,
    pub queue: &'static str,
}

#[derive(Debug, Clone)]
pub struct JobSubmitter {
    registry: Arc<QueueRegistry>,
    default_policy: RetryPolicy,
}

impl JobSubmitter {
    pub fn new(registry: Arc<QueueRegistry>, default_policy: RetryPolicy) -> Self {
        Self {
            registry,
            default_policy,
        }
    }

    pub fn registry(&self) -> &Arc<QueueRegistry> {
        &self.registry
    }

    pub fn default_policy(&self) -> RetryPolicy {
        self.default_policy
    }

    /// Enqueue `payload` on `stage`'s queue, creating the queue on first use
    pub async fn submit<T>(
        &self,
        stage: PipelineStage,
        payload: T,
        policy: Option<RetryPolicy>,
    ) -> PipelineResult<SubmittedJob>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let envelope = JobEnvelope::new(stage, payload, policy.unwrap_or(self.default_policy));
        let message_id = self.send_envelope(&envelope, Duration::ZERO).await?;
        debug!(
            stage = %stage,
            job_id = %envelope.job_id,
            message_id = %message_id,
            "Job submitted"
        );
        Ok(SubmittedJob {
            job_id: envelope.job_id,
            message_id,
            queue: stage.queue_name(),
        })
    }

    /// Like [`submit`](Self::submit), addressed by queue name.
    /// Unknown names fail with `InvalidStage` before anything is enqueued.
    pub async fn submit_to<T>(
        &self,
        stage_name: &str,
        payload: T,
        policy: Option<RetryPolicy>,
    ) -> PipelineResult<SubmittedJob>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let stage: PipelineStage = stage_name.parse()?;
        self.submit(stage, payload, policy).await
    }

    /// Put an envelope on its stage queue, visible after `delay`
    pub async fn send_envelope<T>(
        &self,
        envelope: &JobEnvelope<T>,
        delay: Duration,
    ) -> PipelineResult<MessageId>
    where
        T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static,
    {
        let queue = self.registry.queue(envelope.stage).await?;
        let message_id = self
            .registry
            .provider()
            .send_message(queue, envelope, delay)
            .await?;
        Ok(message_id)
    }

    pub async fn submit_batch_job(&self, payload: BatchJobPayload) -> PipelineResult<SubmittedJob> {
        self.submit(PipelineStage::BatchTranslation, payload, None)
            .await
    }

    pub async fn submit_file_job(&self, payload: FileJobPayload) -> PipelineResult<SubmittedJob> {
        self.submit(PipelineStage::FileProcessing, payload, None)
            .await
    }

    pub async fn submit_translation_group(
        &self,
        payload: TranslationGroupPayload,
    ) -> PipelineResult<SubmittedJob> {
        self.submit(PipelineStage::Translation, payload, None).await
    }
}
