//! # In-Memory Messaging Service
//!
//! Process-local queue backend used by the test suite and by single-process
//! development runs.
//!
//! - FIFO `VecDeque` per queue with visibility timeouts and delayed sends
//! - An archive per queue, purged by the retention sweeper
//! - A per-queue `Notify` so idle consumers block instead of spinning
//! - Job progress stamped with its update time, purged with the archive

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Notify, RwLock};
use uuid::Uuid;

use crate::messaging::traits::{MessagingService, QueueMessage};
use crate::messaging::types::{MessageId, QueueStats, QueuedMessage, ReceiptHandle};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
struct InMemoryQueuedMessage {
    id: u64,
    payload: Vec<u8>,
    enqueued_at: DateTime<Utc>,
    visible_at: DateTime<Utc>,
    receive_count: u32,
}

#[derive(Debug, Clone)]
struct ArchivedMessage {
    payload: Vec<u8>,
    archived_at: DateTime<Utc>,
}

#[derive(Debug)]
struct InMemoryQueue {
    messages: VecDeque<InMemoryQueuedMessage>,
    archive: Vec<ArchivedMessage>,
    next_id: u64,
    notify: Arc<Notify>,
    total_sent: u64,
    total_acked: u64,
    total_archived: u64,
}

impl InMemoryQueue {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            archive: Vec::new(),
            next_id: 1,
            notify: Arc::new(Notify::new()),
            total_sent: 0,
            total_acked: 0,
            total_archived: 0,
        }
    }

    fn has_visible(&self, now: DateTime<Utc>) -> bool {
        self.messages.iter().any(|m| m.visible_at <= now)
    }

    fn take(&mut self, message_id: u64) -> Option<InMemoryQueuedMessage> {
        let pos = self.messages.iter().position(|m| m.id == message_id)?;
        self.messages.remove(pos)
    }
}

fn chrono_duration(duration: Duration) -> Result<chrono::Duration, MessagingError> {
    chrono::Duration::from_std(duration)
        .map_err(|e| MessagingError::internal(format!("duration out of range: {e}")))
}

fn parse_handle(receipt_handle: &ReceiptHandle) -> Result<u64, MessagingError> {
    receipt_handle
        .as_str()
        .parse()
        .map_err(|_| MessagingError::invalid_receipt_handle(receipt_handle.as_str()))
}

#[derive(Debug, Clone)]
struct ProgressEntry {
    progress: serde_json::Value,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct InMemoryMessagingService {
    queues: RwLock<HashMap<String, InMemoryQueue>>,
    progress: DashMap<(String, Uuid), ProgressEntry>,
}

impl InMemoryMessagingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live messages in a queue, visible or reserved (for testing)
    pub async fn queue_length(&self, queue_name: &str) -> usize {
        let queues = self.queues.read().await;
        queues.get(queue_name).map(|q| q.messages.len()).unwrap_or(0)
    }

    /// Messages that could be received right now (for testing)
    pub async fn visible_length(&self, queue_name: &str) -> usize {
        let now = Utc::now();
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.iter().filter(|m| m.visible_at <= now).count())
            .unwrap_or(0)
    }

    /// Decoded archive contents, oldest first (for testing)
    pub async fn archived_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
    ) -> Result<Vec<T>, MessagingError> {
        let queues = self.queues.read().await;
        let Some(queue) = queues.get(queue_name) else {
            return Ok(Vec::new());
        };
        queue
            .archive
            .iter()
            .map(|archived| T::from_bytes(&archived.payload))
            .collect()
    }

    /// Visibility deadlines of live messages, in queue order (for testing)
    pub async fn reserved_until(&self, queue_name: &str) -> Vec<DateTime<Utc>> {
        let queues = self.queues.read().await;
        queues
            .get(queue_name)
            .map(|q| q.messages.iter().map(|m| m.visible_at).collect())
            .unwrap_or_default()
    }

    /// Jobs with recorded progress on a queue (for testing)
    pub fn progress_entries(&self, queue_name: &str) -> usize {
        self.progress
            .iter()
            .filter(|entry| entry.key().0 == queue_name)
            .count()
    }

    /// Make every pending message visible now, skipping backoff delays (for testing)
    pub async fn release_delayed(&self, queue_name: &str) {
        let now = Utc::now();
        let mut queues = self.queues.write().await;
        if let Some(queue) = queues.get_mut(queue_name) {
            for message in queue.messages.iter_mut() {
                if message.visible_at > now {
                    message.visible_at = now;
                }
            }
            queue.notify.notify_waiters();
        }
    }
}

#[async_trait]
impl MessagingService for InMemoryMessagingService {
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let mut queues = self.queues.write().await;
        queues
            .entry(queue_name.to_string())
            .or_insert_with(InMemoryQueue::new);
        Ok(())
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
        delay: Duration,
    ) -> Result<MessageId, MessagingError> {
        let payload = message.to_bytes()?;
        let now = Utc::now();
        let visible_at = now + chrono_duration(delay)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let id = queue.next_id;
        queue.next_id += 1;
        queue.total_sent += 1;
        queue.messages.push_back(InMemoryQueuedMessage {
            id,
            payload,
            enqueued_at: now,
            visible_at,
            receive_count: 0,
        });
        queue.notify.notify_waiters();

        Ok(MessageId::from(id))
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let now = Utc::now();
        let visible_until = now + chrono_duration(visibility_timeout)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let mut received = Vec::new();
        for msg in queue.messages.iter_mut() {
            if received.len() >= max_messages {
                break;
            }
            if msg.visible_at > now {
                continue;
            }

            let decoded = T::from_bytes(&msg.payload)?;
            msg.visible_at = visible_until;
            msg.receive_count += 1;

            received.push(QueuedMessage::new(
                ReceiptHandle::from(msg.id),
                decoded,
                msg.receive_count,
                msg.enqueued_at,
            ));
        }

        Ok(received)
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let message_id = parse_handle(receipt_handle)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        queue
            .take(message_id)
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))?;
        queue.total_acked += 1;
        Ok(())
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        visibility_timeout: Duration,
    ) -> Result<(), MessagingError> {
        let message_id = parse_handle(receipt_handle)?;
        let visible_until = Utc::now() + chrono_duration(visibility_timeout)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;
        let message = queue
            .messages
            .iter_mut()
            .find(|m| m.id == message_id)
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))?;
        message.visible_at = visible_until;
        Ok(())
    }

    async fn archive_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let message_id = parse_handle(receipt_handle)?;

        let mut queues = self.queues.write().await;
        let queue = queues
            .get_mut(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let message = queue
            .take(message_id)
            .ok_or_else(|| MessagingError::message_not_found(message_id.to_string()))?;
        queue.archive.push(ArchivedMessage {
            payload: message.payload,
            archived_at: Utc::now(),
        });
        queue.total_archived += 1;
        Ok(())
    }

    async fn record_progress(
        &self,
        queue_name: &str,
        job_id: Uuid,
        progress: &serde_json::Value,
    ) -> Result<(), MessagingError> {
        self.progress.insert(
            (queue_name.to_string(), job_id),
            ProgressEntry {
                progress: progress.clone(),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    async fn job_progress(
        &self,
        queue_name: &str,
        job_id: Uuid,
    ) -> Result<Option<serde_json::Value>, MessagingError> {
        Ok(self
            .progress
            .get(&(queue_name.to_string(), job_id))
            .map(|entry| entry.value().progress.clone()))
    }

    async fn purge_archived_before(
        &self,
        queue_name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, MessagingError> {
        self.progress
            .retain(|key, entry| key.0 != queue_name || entry.updated_at >= cutoff);

        let mut queues = self.queues.write().await;
        let Some(queue) = queues.get_mut(queue_name) else {
            return Ok(0);
        };
        let before = queue.archive.len();
        queue.archive.retain(|archived| archived.archived_at >= cutoff);
        Ok((before - queue.archive.len()) as u64)
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let now = Utc::now();
        let queues = self.queues.read().await;
        let queue = queues
            .get(queue_name)
            .ok_or_else(|| MessagingError::queue_not_found(queue_name))?;

        let in_flight = queue
            .messages
            .iter()
            .filter(|m| m.receive_count > 0 && m.visible_at > now)
            .count() as u64;
        let mut stats = QueueStats::new(queue_name, queue.messages.len() as u64)
            .with_in_flight_count(in_flight)
            .with_archived_count(queue.archive.len() as u64);
        if let Some(oldest) = queue.messages.iter().map(|m| m.enqueued_at).min() {
            if let Ok(age) = (now - oldest).to_std() {
                stats = stats.with_oldest_message_age(age);
            }
        }
        Ok(stats)
    }

    async fn wait_for_messages(&self, queue_name: &str, max_wait: Duration) {
        let notify = {
            let queues = self.queues.read().await;
            queues.get(queue_name).map(|queue| Arc::clone(&queue.notify))
        };
        let Some(notify) = notify else {
            tokio::time::sleep(max_wait).await;
            return;
        };

        let notified = notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        {
            let queues = self.queues.read().await;
            if queues
                .get(queue_name)
                .is_some_and(|queue| queue.has_visible(Utc::now()))
            {
                return;
            }
        }

        let _ = tokio::time::timeout(max_wait, notified).await;
    }

    fn provider_name(&self) -> &'static str {
        "in_memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const VT: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_fifo_receive_and_ack() {
        let service = InMemoryMessagingService::new();
        service.ensure_queue("translation").await.unwrap();

        for n in 0..3 {
            service
                .send_message("translation", &json!({ "n": n }), Duration::ZERO)
                .await
                .unwrap();
        }

        let received = service
            .receive_messages::<serde_json::Value>("translation", 10, VT)
            .await
            .unwrap();
        let order: Vec<i64> = received
            .iter()
            .map(|m| m.message["n"].as_i64().unwrap())
            .collect();
        assert_eq!(order, vec![0, 1, 2]);

        // reserved messages are invisible until acked
        let again = service
            .receive_messages::<serde_json::Value>("translation", 10, VT)
            .await
            .unwrap();
        assert!(again.is_empty());

        for msg in &received {
            service
                .ack_message("translation", &msg.receipt_handle)
                .await
                .unwrap();
        }
        assert_eq!(service.queue_length("translation").await, 0);
    }

    #[tokio::test]
    async fn test_visibility_timeout_redelivers() {
        let service = InMemoryMessagingService::new();
        service.ensure_queue("file-processing").await.unwrap();
        service
            .send_message("file-processing", &json!("job"), Duration::ZERO)
            .await
            .unwrap();

        let first = service
            .receive_messages::<serde_json::Value>("file-processing", 1, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = service
            .receive_messages::<serde_json::Value>("file-processing", 1, VT)
            .await
            .unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].receive_count, 2);
    }

    #[tokio::test]
    async fn test_delayed_message_is_hidden_until_released() {
        let service = InMemoryMessagingService::new();
        service.ensure_queue("batch-translation").await.unwrap();
        service
            .send_message("batch-translation", &json!(1), Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(service.visible_length("batch-translation").await, 0);
        service.release_delayed("batch-translation").await;
        assert_eq!(service.visible_length("batch-translation").await, 1);
    }

    #[tokio::test]
    async fn test_archive_and_purge() {
        let service = InMemoryMessagingService::new();
        service.ensure_queue("translation").await.unwrap();
        service
            .send_message("translation", &json!({"done": true}), Duration::ZERO)
            .await
            .unwrap();
        let msgs = service
            .receive_messages::<serde_json::Value>("translation", 1, VT)
            .await
            .unwrap();
        service
            .archive_message("translation", &msgs[0].receipt_handle)
            .await
            .unwrap();

        let archived: Vec<serde_json::Value> =
            service.archived_messages("translation").await.unwrap();
        assert_eq!(archived, vec![json!({"done": true})]);

        let kept = service
            .purge_archived_before("translation", Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(kept, 0);
        let purged = service
            .purge_archived_before("translation", Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(purged, 1);
    }

    #[tokio::test]
    async fn test_extend_visibility_keeps_message_reserved() {
        let service = InMemoryMessagingService::new();
        service.ensure_queue("file-processing").await.unwrap();
        service
            .send_message("file-processing", &json!("long job"), Duration::ZERO)
            .await
            .unwrap();

        let first = service
            .receive_messages::<serde_json::Value>("file-processing", 1, Duration::ZERO)
            .await
            .unwrap();
        service
            .extend_visibility("file-processing", &first[0].receipt_handle, VT)
            .await
            .unwrap();

        let again = service
            .receive_messages::<serde_json::Value>("file-processing", 1, VT)
            .await
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(service.visible_length("file-processing").await, 0);
    }

    #[tokio::test]
    async fn test_purge_drops_stale_progress() {
        let service = InMemoryMessagingService::new();
        service.ensure_queue("translation").await.unwrap();
        service.ensure_queue("file-processing").await.unwrap();
        let job_id = Uuid::new_v4();
        service
            .record_progress("translation", job_id, &json!({"processedTexts": 3}))
            .await
            .unwrap();
        service
            .record_progress("file-processing", job_id, &json!({"status": "ready"}))
            .await
            .unwrap();

        service
            .purge_archived_before("translation", Utc::now() - chrono::Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(service.progress_entries("translation"), 1);

        service
            .purge_archived_before("translation", Utc::now() + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(service.progress_entries("translation"), 0);
        assert!(service
            .job_progress("translation", job_id)
            .await
            .unwrap()
            .is_none());
        assert_eq!(service.progress_entries("file-processing"), 1);
    }

    #[tokio::test]
    async fn test_send_to_missing_queue_fails() {
        let service = InMemoryMessagingService::new();
        let result = service
            .send_message("nowhere", &json!(1), Duration::ZERO)
            .await;
        assert!(matches!(result, Err(MessagingError::QueueNotFound { .. })));
    }

    #[tokio::test]
    async fn test_wait_wakes_on_send() {
        let service = Arc::new(InMemoryMessagingService::new());
        service.ensure_queue("translation").await.unwrap();

        let waiter = {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                let started = std::time::Instant::now();
                service
                    .wait_for_messages("translation", Duration::from_secs(10))
                    .await;
                started.elapsed()
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        service
            .send_message("translation", &json!(1), Duration::ZERO)
            .await
            .unwrap();

        let waited = waiter.await.unwrap();
        assert!(waited < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_progress_round_trip() {
        let service = InMemoryMessagingService::new();
        let job_id = Uuid::new_v4();
        assert!(service
            .job_progress("batch-translation", job_id)
            .await
            .unwrap()
            .is_none());
        service
            .record_progress(
                "batch-translation",
                job_id,
                &json!({"processedJobs": 1, "totalJobs": 3}),
            )
            .await
            .unwrap();
        let progress = service
            .job_progress("batch-translation", job_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(progress["processedJobs"], 1);
    }
}
