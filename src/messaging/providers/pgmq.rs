//! # PGMQ Messaging Service
//!
//! Queue backend on top of the PostgreSQL `pgmq` extension. Queue operations
//! go through the `pgmq` crate's [`PGMQueue`]; job progress and archive
//! retention use plain `sqlx` against the same pool.
//!
//! Stage names use hyphens (`file-processing`) while pgmq queue tables must be
//! valid identifiers, so every name is mapped to its underscore form before it
//! reaches pgmq.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pgmq::PGMQueue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::messaging::traits::{MessagingService, QueueMessage};
use crate::messaging::types::{whole_seconds, MessageId, QueueStats, QueuedMessage, ReceiptHandle};
use crate::messaging::MessagingError;

#[derive(Debug, Clone)]
pub struct PgmqMessagingService {
    pgmq: PGMQueue,
}

impl PgmqMessagingService {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self, MessagingError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| MessagingError::connection(e.to_string()))?;
        Ok(Self::new_with_pool(pool).await)
    }

    /// Preferred when the record store shares the same pool
    pub async fn new_with_pool(pool: PgPool) -> Self {
        let pgmq = PGMQueue::new_with_pool(pool).await;
        Self { pgmq }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pgmq.connection
    }
}

/// Physical pgmq queue name for a logical queue name
pub fn physical_queue_name(queue_name: &str) -> Result<String, MessagingError> {
    let physical = queue_name.replace('-', "_").to_lowercase();
    let valid = !physical.is_empty()
        && physical
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(physical)
    } else {
        Err(MessagingError::queue_operation(
            queue_name,
            "validate",
            "queue names may only contain letters, digits, '-' and '_'",
        ))
    }
}

fn message_id(queue_name: &str, receipt_handle: &ReceiptHandle) -> Result<i64, MessagingError> {
    receipt_handle.as_i64().ok_or_else(|| {
        debug!(queue = %queue_name, handle = %receipt_handle, "Non-numeric pgmq receipt handle");
        MessagingError::invalid_receipt_handle(receipt_handle.as_str())
    })
}

#[async_trait]
impl MessagingService for PgmqMessagingService {
    #[instrument(skip(self))]
    async fn ensure_queue(&self, queue_name: &str) -> Result<(), MessagingError> {
        let physical = physical_queue_name(queue_name)?;
        self.pgmq
            .create(&physical)
            .await
            .map_err(|e| MessagingError::queue_creation(queue_name, e.to_string()))?;
        info!(queue = %queue_name, physical = %physical, "Queue ready");
        Ok(())
    }

    async fn send_message<T: QueueMessage>(
        &self,
        queue_name: &str,
        message: &T,
        delay: Duration,
    ) -> Result<MessageId, MessagingError> {
        let physical = physical_queue_name(queue_name)?;
        let json_value: serde_json::Value = serde_json::from_slice(&message.to_bytes()?)
            .map_err(|e| MessagingError::serialization(e.to_string()))?;

        let delay_secs = whole_seconds(delay).max(0) as u64;
        let msg_id = self
            .pgmq
            .send_delay(&physical, &json_value, delay_secs)
            .await
            .map_err(|e| MessagingError::send(queue_name, e.to_string()))?;

        Ok(MessageId::from(msg_id))
    }

    async fn receive_messages<T: QueueMessage>(
        &self,
        queue_name: &str,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<QueuedMessage<T>>, MessagingError> {
        let physical = physical_queue_name(queue_name)?;
        let qty = i32::try_from(max_messages).unwrap_or(i32::MAX);

        let messages = self
            .pgmq
            .read_batch::<serde_json::Value>(&physical, Some(whole_seconds(visibility_timeout)), qty)
            .await
            .map_err(|e| MessagingError::receive(queue_name, e.to_string()))?
            .unwrap_or_default();

        let mut received = Vec::with_capacity(messages.len());
        for message in messages {
            let bytes = serde_json::to_vec(&message.message)?;
            let decoded = T::from_bytes(&bytes)?;
            received.push(QueuedMessage::new(
                ReceiptHandle::from(message.msg_id),
                decoded,
                u32::try_from(message.read_ct).unwrap_or(0),
                message.enqueued_at,
            ));
        }

        Ok(received)
    }

    async fn extend_visibility(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
        visibility_timeout: Duration,
    ) -> Result<(), MessagingError> {
        let physical = physical_queue_name(queue_name)?;
        let msg_id = message_id(queue_name, receipt_handle)?;
        let visible_until = Utc::now()
            + chrono::Duration::from_std(visibility_timeout)
                .map_err(|e| MessagingError::internal(format!("duration out of range: {e}")))?;

        self.pgmq
            .set_vt::<serde_json::Value>(&physical, msg_id, visible_until)
            .await
            .map_err(|e| {
                MessagingError::queue_operation(
                    queue_name,
                    format!("set_vt(msg_id={msg_id})"),
                    e.to_string(),
                )
            })?;
        Ok(())
    }

    async fn ack_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let physical = physical_queue_name(queue_name)?;
        let msg_id = message_id(queue_name, receipt_handle)?;

        self.pgmq
            .delete(&physical, msg_id)
            .await
            .map_err(|e| MessagingError::ack(queue_name, msg_id, e.to_string()))?;
        Ok(())
    }

    async fn archive_message(
        &self,
        queue_name: &str,
        receipt_handle: &ReceiptHandle,
    ) -> Result<(), MessagingError> {
        let physical = physical_queue_name(queue_name)?;
        let msg_id = message_id(queue_name, receipt_handle)?;

        self.pgmq
            .archive(&physical, msg_id)
            .await
            .map_err(|e| MessagingError::archive(queue_name, msg_id, e.to_string()))?;
        Ok(())
    }

    async fn record_progress(
        &self,
        queue_name: &str,
        job_id: Uuid,
        progress: &serde_json::Value,
    ) -> Result<(), MessagingError> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_job_progress (queue_name, job_id, progress, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (queue_name, job_id)
            DO UPDATE SET progress = EXCLUDED.progress, updated_at = NOW()
            "#,
        )
        .bind(queue_name)
        .bind(job_id)
        .bind(progress)
        .execute(self.pool())
        .await
        .map_err(|e| MessagingError::database_query("record_progress", e.to_string()))?;
        Ok(())
    }

    async fn job_progress(
        &self,
        queue_name: &str,
        job_id: Uuid,
    ) -> Result<Option<serde_json::Value>, MessagingError> {
        let progress: Option<serde_json::Value> = sqlx::query_scalar(
            "SELECT progress FROM pipeline_job_progress WHERE queue_name = $1 AND job_id = $2",
        )
        .bind(queue_name)
        .bind(job_id)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| MessagingError::database_query("job_progress", e.to_string()))?;
        Ok(progress)
    }

    #[instrument(skip(self))]
    async fn purge_archived_before(
        &self,
        queue_name: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, MessagingError> {
        let physical = physical_queue_name(queue_name)?;
        // identifier is validated by physical_queue_name
        let sql = format!("DELETE FROM pgmq.a_{physical} WHERE archived_at < $1");
        let result = sqlx::query(&sql)
            .bind(cutoff)
            .execute(self.pool())
            .await
            .map_err(|e| MessagingError::queue_operation(queue_name, "purge", e.to_string()))?;

        sqlx::query("DELETE FROM pipeline_job_progress WHERE queue_name = $1 AND updated_at < $2")
            .bind(queue_name)
            .bind(cutoff)
            .execute(self.pool())
            .await
            .map_err(|e| MessagingError::database_query("purge_progress", e.to_string()))?;

        Ok(result.rows_affected())
    }

    async fn queue_stats(&self, queue_name: &str) -> Result<QueueStats, MessagingError> {
        let physical = physical_queue_name(queue_name)?;
        let row = sqlx::query(
            "SELECT queue_length, oldest_msg_age_sec FROM pgmq.metrics($1)",
        )
        .bind(&physical)
        .fetch_optional(self.pool())
        .await
        .map_err(|e| MessagingError::queue_operation(queue_name, "queue_stats", e.to_string()))?;

        let Some(row) = row else {
            return Err(MessagingError::queue_not_found(queue_name));
        };
        let length: Option<i64> = row.try_get("queue_length")?;
        let oldest: Option<i32> = row.try_get("oldest_msg_age_sec")?;

        let mut stats = QueueStats::new(queue_name, length.unwrap_or(0).max(0) as u64);
        if let Some(age) = oldest {
            stats = stats.with_oldest_message_age(Duration::from_secs(age.max(0) as u64));
        }
        Ok(stats)
    }

    fn provider_name(&self) -> &'static str {
        "pgmq"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_physical_queue_names() {
        assert_eq!(
            physical_queue_name("batch-translation").unwrap(),
            "batch_translation"
        );
        assert_eq!(
            physical_queue_name("file-processing").unwrap(),
            "file_processing"
        );
        assert_eq!(physical_queue_name("translation").unwrap(), "translation");
    }

    #[test]
    fn test_physical_queue_name_rejects_sql() {
        assert!(physical_queue_name("x; DROP TABLE users").is_err());
        assert!(physical_queue_name("").is_err());
    }

    #[tokio::test]
    async fn test_pgmq_send_receive_archive() {
        let Ok(database_url) = std::env::var("TEST_DATABASE_URL") else {
            println!("Skipping pgmq test: TEST_DATABASE_URL not set");
            return;
        };
        let service = PgmqMessagingService::new(&database_url, 2).await.unwrap();
        let queue = format!("pipeline-test-{}", Uuid::new_v4().simple());
        service.ensure_queue(&queue).await.unwrap();

        service
            .send_message(&queue, &serde_json::json!({"hello": "world"}), Duration::ZERO)
            .await
            .unwrap();
        let received = service
            .receive_messages::<serde_json::Value>(&queue, 5, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].message["hello"], "world");

        service
            .extend_visibility(&queue, &received[0].receipt_handle, Duration::from_secs(60))
            .await
            .unwrap();
        let hidden = service
            .receive_messages::<serde_json::Value>(&queue, 5, Duration::from_secs(30))
            .await
            .unwrap();
        assert!(hidden.is_empty());

        service
            .archive_message(&queue, &received[0].receipt_handle)
            .await
            .unwrap();
        let stats = service.queue_stats(&queue).await.unwrap();
        assert_eq!(stats.message_count, 0);
    }
}
