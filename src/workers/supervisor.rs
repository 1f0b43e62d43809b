//! # Worker Pool Supervisor
//!
//! Owns the three stage workers and the archive retention sweeper for one
//! process. Shutdown is an explicit call; the binary maps process signals
//! onto it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::batch_orchestrator::BatchOrchestratorHandler;
use super::consumer::StageWorker;
use super::file_decomposition::FileDecompositionHandler;
use super::translation::TranslationHandler;
use super::workspace::WorkspaceManager;
use crate::collaborators::{DocumentParser, TranslationBackend};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::orchestration::ProgressAggregator;
use crate::queues::{JobSubmitter, PipelineStage, QueueRegistry};
use crate::store::RecordStore;

/// Everything the stage handlers need from outside the pipeline
#[derive(Debug, Clone)]
pub struct PipelineComponents {
    pub submitter: JobSubmitter,
    pub store: Arc<dyn RecordStore>,
    pub parser: Arc<dyn DocumentParser>,
    pub translator: Arc<dyn TranslationBackend>,
}

#[derive(Debug)]
pub struct WorkerPoolSupervisor {
    shutdown_sender: Option<watch::Sender<bool>>,
    tasks: JoinSet<()>,
}

impl WorkerPoolSupervisor {
    /// Create every stage queue, then start the stage workers and the sweeper
    pub async fn start(
        components: PipelineComponents,
        config: &PipelineConfig,
    ) -> PipelineResult<Self> {
        let PipelineComponents {
            submitter,
            store,
            parser,
            translator,
        } = components;
        submitter.registry().ensure_all().await?;

        let aggregator = ProgressAggregator::new(store.clone());
        let poll_interval = config.workers.poll_interval();
        let (shutdown_sender, shutdown) = watch::channel(false);
        let mut tasks = JoinSet::new();

        let batch_worker = StageWorker::new(
            Arc::new(BatchOrchestratorHandler::new(
                store.clone(),
                submitter.clone(),
                aggregator.clone(),
            )),
            submitter.clone(),
            config.workers.batch_concurrency,
            poll_interval,
        );
        let file_worker = StageWorker::new(
            Arc::new(FileDecompositionHandler::new(
                store.clone(),
                submitter.clone(),
                aggregator.clone(),
                parser,
                WorkspaceManager::new(&config.workspace.root),
                config.translation.chunk_size,
            )),
            submitter.clone(),
            config.workers.file_concurrency,
            poll_interval,
        );
        let translation_worker = StageWorker::new(
            Arc::new(TranslationHandler::new(
                store,
                aggregator,
                translator,
                config.translation.default_model.clone(),
            )),
            submitter.clone(),
            config.workers.translation_concurrency,
            poll_interval,
        );

        let rx = shutdown.clone();
        tasks.spawn(async move { batch_worker.run(rx).await });
        let rx = shutdown.clone();
        tasks.spawn(async move { file_worker.run(rx).await });
        let rx = shutdown.clone();
        tasks.spawn(async move { translation_worker.run(rx).await });

        let registry = submitter.registry().clone();
        let retention = submitter.default_policy().retention;
        let sweep_interval = config.workers.retention_sweep_interval();
        tasks.spawn(retention_sweeper(registry, retention, sweep_interval, shutdown));

        info!(
            batch_concurrency = config.workers.batch_concurrency,
            file_concurrency = config.workers.file_concurrency,
            translation_concurrency = config.workers.translation_concurrency,
            "Worker pool started"
        );
        Ok(Self {
            shutdown_sender: Some(shutdown_sender),
            tasks,
        })
    }

    pub fn is_running(&self) -> bool {
        self.shutdown_sender.is_some()
    }

    /// Stop intake and wait up to `grace` for in-flight jobs. Jobs still
    /// running after that are aborted; their messages reappear once the
    /// visibility timeout lapses.
    pub async fn shutdown(mut self, grace: Duration) -> PipelineResult<()> {
        let Some(sender) = self.shutdown_sender.take() else {
            warn!("Worker pool already stopped");
            return Ok(());
        };
        // Receivers may already be gone if every task exited on its own.
        let _ = sender.send(true);
        info!(grace_seconds = grace.as_secs(), "Worker pool shutdown requested");

        let drained = tokio::time::timeout(grace, async {
            while let Some(joined) = self.tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Worker task ended abnormally");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => {
                info!("Worker pool stopped");
                Ok(())
            }
            Err(_) => {
                let remaining = self.tasks.len();
                self.tasks.abort_all();
                Err(PipelineError::Internal(format!(
                    "{remaining} worker tasks still running after {}s grace, aborted",
                    grace.as_secs()
                )))
            }
        }
    }
}

/// Delete archived messages older than `retention` from every stage queue
pub async fn purge_expired_archives(
    registry: &QueueRegistry,
    retention: Duration,
) -> PipelineResult<u64> {
    let retention = chrono::Duration::from_std(retention)
        .map_err(|e| PipelineError::Configuration(format!("retention out of range: {e}")))?;
    let cutoff = Utc::now() - retention;

    let mut purged = 0;
    for stage in PipelineStage::ALL {
        let queue = registry.queue(stage).await?;
        purged += registry
            .provider()
            .purge_archived_before(queue, cutoff)
            .await?;
    }
    Ok(purged)
}

async fn retention_sweeper(
    registry: Arc<QueueRegistry>,
    retention: Duration,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match purge_expired_archives(&registry, retention).await {
                    Ok(0) => {}
                    Ok(purged) => debug!(purged, "Expired archived jobs purged"),
                    Err(e) => warn!(error = %e, "Archive retention sweep failed"),
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
