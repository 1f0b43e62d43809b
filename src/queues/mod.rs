//! # Queues
//!
//! Stage queues, the retry policy value object, and the typed submission API.

pub mod envelope;
pub mod policy;
pub mod registry;
pub mod stage;
pub mod submission;

pub use envelope::JobEnvelope;
pub use policy::{Backoff, RetryPolicy};
pub use registry::QueueRegistry;
pub use stage::PipelineStage;
pub use submission::{JobSubmitter, SubmittedJob};
