//! # Queue Registry
//!
//! Owns the queue backend handle and creates each stage's queue at most once,
//! on first use. Built once at process start and shared as `Arc<QueueRegistry>`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info};

use super::stage::PipelineStage;
use crate::error::PipelineResult;
use crate::messaging::MessagingProvider;

#[derive(Debug)]
pub struct QueueRegistry {
    provider: Arc<MessagingProvider>,
    queues: [OnceCell<&'static str>; 3],
    creations: AtomicUsize,
}

impl QueueRegistry {
    pub fn new(provider: Arc<MessagingProvider>) -> Self {
        Self {
            provider,
            queues: [OnceCell::new(), OnceCell::new(), OnceCell::new()],
            creations: AtomicUsize::new(0),
        }
    }

    pub fn provider(&self) -> &Arc<MessagingProvider> {
        &self.provider
    }

    /// Queue name for `stage`, creating the queue on the first call.
    ///
    /// Concurrent first callers wait on the same initialization; a failed
    /// initialization leaves the cell empty so the next call tries again.
    pub async fn queue(&self, stage: PipelineStage) -> PipelineResult<&'static str> {
        let name = self.queues[stage.index()]
            .get_or_try_init(|| async {
                let name = stage.queue_name();
                debug!(queue = %name, "Creating queue on first use");
                self.provider.ensure_queue(name).await?;
                self.creations.fetch_add(1, Ordering::SeqCst);
                info!(queue = %name, provider = self.provider.provider_name(), "Queue initialized");
                PipelineResult::Ok(name)
            })
            .await?;
        Ok(*name)
    }

    /// Initialize every stage queue, e.g. at worker startup
    pub async fn ensure_all(&self) -> PipelineResult<()> {
        for stage in PipelineStage::ALL {
            self.queue(stage).await?;
        }
        Ok(())
    }

    pub fn is_initialized(&self, stage: PipelineStage) -> bool {
        self.queues[stage.index()].initialized()
    }

    /// Number of backend queue creations performed by this registry
    pub fn creation_count(&self) -> usize {
        self.creations.load(Ordering::SeqCst)
    }
}
