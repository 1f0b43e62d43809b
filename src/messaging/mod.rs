//! # Messaging
//!
//! Durable queue backend abstraction. Stage workers and the job submitter talk
//! to queues only through [`MessagingProvider`], which dispatches to either the
//! pgmq backend or the in-memory backend.

pub mod errors;
pub mod provider;
pub mod providers;
pub mod traits;
pub mod types;

pub use errors::MessagingError;
pub use provider::MessagingProvider;
pub use providers::{InMemoryMessagingService, PgmqMessagingService};
pub use traits::{MessagingService, QueueMessage};
pub use types::{MessageId, QueueStats, QueuedMessage, ReceiptHandle};
