//! Stage handler contract.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::context::JobContext;
use crate::error::{PipelineError, PipelineResult};
use crate::queues::PipelineStage;

/// Business logic of one pipeline stage.
///
/// [`StageWorker`](super::StageWorker) owns delivery, timeouts and retries;
/// a handler only processes one payload. Handlers must be safe to re-run on
/// the same payload, since delivery is at-least-once.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    type Payload: Serialize + DeserializeOwned + Clone + Send + Sync + 'static;

    fn stage(&self) -> PipelineStage;

    async fn handle(&self, ctx: &JobContext, payload: Self::Payload) -> PipelineResult<()>;

    /// Called once when the job is permanently failed: retries exhausted or
    /// a non-retryable error.
    async fn on_exhausted(
        &self,
        _payload: &Self::Payload,
        _error: &PipelineError,
    ) -> PipelineResult<()> {
        Ok(())
    }
}
