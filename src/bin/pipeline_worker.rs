//! # Pipeline Worker
//!
//! Thin wrapper binary that runs all three stage worker pools in one
//! process until SIGINT/SIGTERM.
//!
//! ## Usage
//!
//! ```bash
//! DATABASE_URL=postgresql://localhost/pipeline cargo run --bin pipeline-worker
//!
//! # In-memory queues and records, for local experiments
//! PIPELINE__BACKEND=in_memory cargo run --bin pipeline-worker
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio::signal;
use tracing::{error, info};

use translation_pipeline::collaborators::{
    CommandDocumentParser, DocumentParser, HttpTranslationBackend, TranslationBackend,
};
use translation_pipeline::logging;
use translation_pipeline::messaging::{MessagingProvider, PgmqMessagingService};
use translation_pipeline::store::{InMemoryRecordStore, PgRecordStore, RecordStore};
use translation_pipeline::{
    ConfigLoader, JobSubmitter, PipelineComponents, QueueBackend, QueueRegistry, RetryPolicy,
    WorkerPoolSupervisor,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_tracing();

    info!("Starting pipeline worker");
    info!("   Version: {}", env!("CARGO_PKG_VERSION"));
    info!("   Environment: {}", logging::get_environment());

    let config = ConfigLoader::load().context("failed to load configuration")?;
    info!("   Queue backend: {:?}", config.backend);

    let (provider, store): (MessagingProvider, Arc<dyn RecordStore>) = match config.backend {
        QueueBackend::Pgmq => {
            info!("   Database: {}", config.redacted_database_url());
            let store = PgRecordStore::connect(&config.database)
                .await
                .context("failed to connect to database")?;
            store.migrate().await.context("failed to run migrations")?;
            let provider = PgmqMessagingService::new_with_pool(store.pool().clone()).await;
            (provider.into(), Arc::new(store) as Arc<dyn RecordStore>)
        }
        QueueBackend::InMemory => (
            MessagingProvider::new_in_memory(),
            Arc::new(InMemoryRecordStore::new()) as Arc<dyn RecordStore>,
        ),
    };

    let registry = Arc::new(QueueRegistry::new(Arc::new(provider)));
    let submitter = JobSubmitter::new(registry, RetryPolicy::from_config(&config.job_policy));
    let parser: Arc<dyn DocumentParser> =
        Arc::new(CommandDocumentParser::from_config(&config.parser));
    let translator: Arc<dyn TranslationBackend> = Arc::new(
        HttpTranslationBackend::from_config(&config.translation)
            .context("failed to build translation backend client")?,
    );

    let supervisor = WorkerPoolSupervisor::start(
        PipelineComponents {
            submitter,
            store,
            parser,
            translator,
        },
        &config,
    )
    .await
    .context("failed to start worker pool")?;

    info!("Pipeline worker running, press Ctrl+C to shut down gracefully");
    shutdown_signal().await;

    info!("Shutdown signal received, draining in-flight jobs...");
    if let Err(e) = supervisor.shutdown(config.workers.shutdown_grace()).await {
        error!("Worker pool did not stop cleanly: {}", e);
    }

    info!("Pipeline worker shutdown complete");
    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C");
        },
        _ = terminate => {
            info!("Received SIGTERM");
        },
    }
}
