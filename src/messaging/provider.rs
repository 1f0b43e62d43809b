//! # Messaging Provider Enum
//!
//! Enum dispatch over the available queue backends.

use std::time::Duration;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::providers::{InMemoryMessagingService, PgmqMessagingService};
use super::traits::{MessagingService, QueueMessage};
use super::types::{MessageId, QueueStats, QueuedMessage, ReceiptHandle};
use super::MessagingError;

#[derive(Debug)]
pub enum MessagingProvider {
    /// PostgreSQL message queue
    Pgmq(PgmqMessagingService),
    /// Process-local queues for tests and single-process development
    InMemory(InMemoryMessagingService),
}

impl MessagingProvider {
    pub fn new_in_memory() -> Self {
        Self::InMemory(InMemoryMessagingService::new())
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Pgmq(s) => s.provider_name(),
            Self::InMemory(s) => s.provider_name(),
        }
    }

    pub fn as_in_memory(&self) -> Option<&InMemoryMessagingService> {
        match self {
            Self::InMemory(s) => Some(s),
            Self::Pgmq(_) => None,
        }
    }

    pub async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.ensure_queue(queue_name).await,
            Self::InMemory(s) => s.ensure_queue(queue_name).await,
        }
    }

    pub async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
        delay: Duration,
    ) -> Result<MessageId, MessagingError> {
        match self {
            Self::Pgmq(s) => s.send_message(queue_name, message, delay).await,
            Self::InMemory(s) => s.send_message(queue_name, message, delay).await,
        }
    }

    pub async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        match self {
            Self::Pgmq(s) => {
                s.receive_messages(queue_name, max_messages, visibility_timeout)
                    .await
            }
            Self::InMemory(s) => {
                s.receive_messages(queue_name, max_messages, visibility_timeout)
                    .await
            }
        }
    }

    pub async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.ack_message(queue_name, receipt_handle).await,
            Self::InMemory(s) => s.ack_message(queue_name, receipt_handle).await,
        }
    }

    pub async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        visibility_timeout: Duration,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => {
                s.extend_visibility(queue_name, receipt_handle, visibility_timeout)
                    .await
            }
            Self::InMemory(s) => {
                s.extend_visibility(queue_name, receipt_handle, visibility_timeout)
                    .await
            }
        }
    }

    pub async fn archive_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.archive_message(queue_name, receipt_handle).await,
            Self::InMemory(s) => s.archive_message(queue_name, receipt_handle).await,
        }
    }

    pub async fn record_progress(
        &self,
        queue_name: &str,
        job_id: Uuid,
        progress: &serde_json::Value,
    ) -> Result<(), MessagingError> {
        match self {
            Self::Pgmq(s) => s.record_progress(queue_name, job_id, progress).await,
            Self::InMemory(s) => s.record_progress(queue_name, job_id, progress).await,
        }
    }

    pub async fn job_progress(
        &self,
        queue_name: &str,
        job_id: Uuid,
    ) -> Result<Option<serde_json::Value>, MessagingError> {
        match self {
            Self::Pgmq(s) => s.job_progress(queue_name, job_id).await,
            Self::InMemory(s) => s.job_progress(queue_name, job_id).await,
        }
    }

    pub async fn purge_archived_before(
        &self,
        queue_name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, MessagingError> {
        match self {
            Self::Pgmq(s) => s.purge_archived_before(queue_name, cutoff).await,
            Self::InMemory(s) => s.purge_archived_before(queue_name, cutoff).await,
        }
    }

    pub async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        match self {
            Self::Pgmq(s) => s.queue_stats(queue_name).await,
            Self::InMemory(s) => s.queue_stats(queue_name).await,
        }
    }

    pub async fn wait_for_messages(&self, queue_name: &str, max_wait: Duration) {
        match self {
            Self::Pgmq(s) => s.wait_for_messages(queue_name, max_wait).await,
            Self::InMemory(s) => s.wait_for_messages(queue_name, max_wait).await,
        }
    }
}

impl From<InMemoryMessagingService> for MessagingProvider {
    fn from(service: InMemoryMessagingService) -> Self {
        Self::InMemory(service)
    }
}

impl From<PgmqMessagingService> for MessagingProvider {
    fn from(service: PgmqMessagingService) -> Self {
        Self::Pgmq(service)
    }
}
