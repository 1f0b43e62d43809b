#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Translation Pipeline
//!
//! Asynchronous, multi-stage job pipeline that takes a batch of uploaded
//! documents through decomposition and translation, and aggregates the
//! per-file outcomes back into a single batch status.
//!
//! ## Architecture
//!
//! ```text
//! BatchService::submit_batch
//!        │
//!        ▼
//! [batch-translation] ─→ BatchOrchestratorHandler ─→ one job per file
//!        │
//!        ▼
//! [file-processing]   ─→ FileDecompositionHandler ─→ parse, persist, chunk
//!        │                        │
//!        ▼                        └─→ ProgressAggregator (batch counters)
//! [translation]       ─→ TranslationHandler       ─→ per-text results + history
//! ```
//!
//! Each stage is an independent pool pulling from its own durable queue.
//! Stages share no in-process state: everything crosses between them as a
//! queued message or a record in the store. Delivery is at-least-once and
//! every handler is safe to re-run.
//!
//! ## Module Organization
//!
//! - [`queues`] - Stage queues, retry policy, job submission API
//! - [`messaging`] - Queue backends (PGMQ and in-memory)
//! - [`workers`] - Worker runtime, stage handlers, supervisor
//! - [`orchestration`] - Progress aggregator and batch service
//! - [`store`] - Durable record store (PostgreSQL and in-memory)
//! - [`collaborators`] - Document parser and translation backend boundaries
//! - [`models`] - Records and queue payloads
//! - [`config`] - Layered configuration
//! - [`error`] - Structured error handling
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use translation_pipeline::messaging::MessagingProvider;
//! use translation_pipeline::models::{FileDescriptor, TranslationOptions};
//! use translation_pipeline::orchestration::BatchService;
//! use translation_pipeline::queues::{JobSubmitter, QueueRegistry, RetryPolicy};
//! use translation_pipeline::store::InMemoryRecordStore;
//!
//! # async fn example() -> translation_pipeline::PipelineResult<()> {
//! let registry = Arc::new(QueueRegistry::new(Arc::new(MessagingProvider::new_in_memory())));
//! let submitter = JobSubmitter::new(registry, RetryPolicy::default());
//! let service = BatchService::new(Arc::new(InMemoryRecordStore::new()), submitter);
//!
//! let submission = service
//!     .submit_batch(
//!         "user-1",
//!         vec![FileDescriptor::new("deck.pptx", "/uploads/deck.pptx")],
//!         TranslationOptions::new("en", "ja"),
//!     )
//!     .await?;
//! println!("batch {} accepted", submission.batch.id);
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod constants;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod models;
pub mod orchestration;
pub mod queues;
pub mod store;
pub mod workers;

pub use config::{ConfigLoader, PipelineConfig, QueueBackend};
pub use error::{ErrorSeverity, PipelineError, PipelineResult};
pub use messaging::{MessagingError, MessagingProvider};
pub use models::{BatchJob, BatchStatus, FileFailure, FileRecord, FileStatus};
pub use orchestration::{BatchService, ProgressAggregator};
pub use queues::{JobSubmitter, PipelineStage, QueueRegistry, RetryPolicy};
pub use store::{InMemoryRecordStore, PgRecordStore, RecordStore};
pub use workers::{PipelineComponents, StageWorker, WorkerPoolSupervisor};
