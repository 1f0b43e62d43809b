//! # Messaging Types
//!
//! Provider-agnostic identifiers and envelopes for queued messages.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// Identifier assigned by the backend when a message is sent
///
/// PGMQ uses its bigint `msg_id`; the in-memory provider uses a per-queue counter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for MessageId {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for MessageId {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// Handle used to delete or archive a received message
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle(pub String);

impl ReceiptHandle {
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ReceiptHandle {
    fn from(id: i64) -> Self {
        Self(id.to_string())
    }
}

impl From<u64> for ReceiptHandle {
    fn from(id: u64) -> Self {
        Self(id.to_string())
    }
}

/// A message received from a queue, with delivery metadata
#[derive(Debug, Clone)]
pub struct QueuedMessage<T> {
    pub receipt_handle: ReceiptHandle,
    pub message: T,
    /// Deliveries so far, including this one. Greater than one means a
    /// previous consumer's visibility timeout lapsed.
    pub receive_count: u32,
    pub enqueued_at: DateTime<Utc>,
}

impl<T> QueuedMessage<T> {
    pub fn new(
        receipt_handle: ReceiptHandle,
        message: T,
        receive_count: u32,
        enqueued_at: DateTime<Utc>,
    ) -> Self {
        Self {
            receipt_handle,
            message,
            receive_count,
            enqueued_at,
        }
    }

    pub fn map<U, F>(self, f: F) -> QueuedMessage<U>
    where
        F: FnOnce(T) -> U,
    {
        QueuedMessage {
            receipt_handle: self.receipt_handle,
            message: f(self.message),
            receive_count: self.receive_count,
            enqueued_at: self.enqueued_at,
        }
    }
}

/// Queue depth snapshot
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub queue_name: String,
    /// Live messages, visible or reserved
    pub message_count: u64,
    pub in_flight_count: Option<u64>,
    pub archived_count: Option<u64>,
    pub oldest_message_age: Option<Duration>,
}

impl QueueStats {
    pub fn new(queue_name: impl Into<String>, message_count: u64) -> Self {
        Self {
            queue_name: queue_name.into(),
            message_count,
            in_flight_count: None,
            archived_count: None,
            oldest_message_age: None,
        }
    }

    pub fn with_in_flight_count(mut self, count: u64) -> Self {
        self.in_flight_count = Some(count);
        self
    }

    pub fn with_archived_count(mut self, count: u64) -> Self {
        self.archived_count = Some(count);
        self
    }

    pub fn with_oldest_message_age(mut self, age: Duration) -> Self {
        self.oldest_message_age = Some(age);
        self
    }
}

/// Convert a std duration to whole seconds for SQL-side visibility timeouts,
/// rounding sub-second remainders up so a non-zero delay never becomes zero.
pub(crate) fn whole_seconds(duration: Duration) -> i32 {
    let mut secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs += 1;
    }
    i32::try_from(secs).unwrap_or(i32::MAX)
}
