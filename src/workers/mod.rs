//! # Stage Workers
//!
//! The worker runtime ([`StageWorker`], [`JobHandler`]) and the three stage
//! handlers it drives:
//!
//! | Stage | Queue | Handler |
//! |---|---|---|
//! | batch orchestration | `batch-translation` | [`BatchOrchestratorHandler`] |
//! | file decomposition | `file-processing` | [`FileDecompositionHandler`] |
//! | text translation | `translation` | [`TranslationHandler`] |
//!
//! [`WorkerPoolSupervisor`] runs all of them in one process.

pub mod batch_orchestrator;
pub mod consumer;
pub mod context;
pub mod file_decomposition;
pub mod handler;
pub mod supervisor;
pub mod translation;
pub mod workspace;

pub use batch_orchestrator::BatchOrchestratorHandler;
pub use consumer::{JobOutcome, StageWorker};
pub use context::JobContext;
pub use file_decomposition::FileDecompositionHandler;
pub use handler::JobHandler;
pub use supervisor::{purge_expired_archives, PipelineComponents, WorkerPoolSupervisor};
pub use translation::TranslationHandler;
pub use workspace::WorkspaceManager;
