//! # Orchestration
//!
//! Batch-level state: the progress aggregator shared by every stage and the
//! batch service used by the dashboard boundary.

pub mod batch_service;
pub mod progress;

pub use batch_service::{BatchService, BatchStatusView, BatchSubmission};
pub use progress::ProgressAggregator;
