//! # Messaging Service Traits
//!
//! Provider-agnostic queue operations. Providers are dispatched through
//! [`MessagingProvider`](super::MessagingProvider) rather than trait objects,
//! since the send/receive methods are generic over the payload type.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::types::{MessageId, QueueStats, QueuedMessage, ReceiptHandle};
use super::MessagingError;

#[async_trait]
pub trait MessagingService: Send + Sync + 'static {
    /// Create a queue if it doesn't exist. Safe to call repeatedly.
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError>;

    /// Send a message that becomes visible after `delay`
    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
        delay: Duration,
    ) -> Result<MessageId, MessagingError>;

    /// Reserve up to `max_messages` visible messages for `visibility_timeout`.
    ///
    /// A reserved message that is neither acked nor archived before the
    /// timeout lapses becomes visible again.
    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError>;

    /// Push a reserved message's visibility out to `visibility_timeout` from now
    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        visibility_timeout: Duration,
    ) -> Result<(), MessagingError>;

    /// Delete a message permanently
    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError>;

    /// Move a message to the queue's archive, where it is retained until purged
    async fn archive_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError>;

    /// Store the latest progress value reported by a running job
    async fn record_progress(
        &self,
        queue_name: &str,
        job_id: Uuid,
        progress: &serde_json::Value,
    ) -> Result<(), MessagingError>;

    /// Last progress value recorded for a job
    async fn job_progress(
        &self,
        queue_name: &str,
        job_id: Uuid,
    ) -> Result<Option<serde_json::Value>, MessagingError>;

    /// Drop archived messages older than `cutoff`; returns how many were removed
    async fn purge_archived_before(
        &self,
        queue_name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, MessagingError>;

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError>;

    /// Block until the queue may have a visible message or `max_wait` elapses.
    ///
    /// Providers without a wake-up channel simply sleep for `max_wait`.
    async fn wait_for_messages(&self, queue_name: &str, max_wait: Duration) {
        let _ = queue_name;
        tokio::time::sleep(max_wait).await;
    }

    fn provider_name(&self) -> &'static str;
}

/// Serialization contract for anything sent through a queue
pub trait QueueMessage: Send + Sync + Clone + 'static {
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError>;

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError>
    where
        Self: Sized;
}

/// JSON encoding for every serde type
impl<T> QueueMessage for T
where
    T: serde::Serialize + serde::de::DeserializeOwned + Send + Sync + Clone + 'static,
{
    fn to_bytes(&self) -> Result<Vec<u8>, MessagingError> {
        serde_json::to_vec(self).map_err(|e| MessagingError::serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, MessagingError> {
        serde_json::from_slice(bytes).map_err(|e| MessagingError::deserialization(e.to_string()))
    }
}
