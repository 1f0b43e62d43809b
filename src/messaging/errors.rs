//! # Messaging Error Types
//!
//! Structured errors for the queue backend.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    #[error("Database query error: {operation}: {message}")]
    DatabaseQuery { operation: String, message: String },

    #[error("Queue operation failed: {queue_name}: {operation}: {message}")]
    QueueOperation {
        queue_name: String,
        operation: String,
        message: String,
    },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Message deserialization error: {message}")]
    MessageDeserialization { message: String },

    #[error("Invalid receipt handle: {handle}")]
    InvalidReceiptHandle { handle: String },

    #[error("Message not found: {message_id}")]
    MessageNotFound { message_id: String },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    pub fn connection(message: impl Into<String>) -> Self {
        Self::DatabaseConnection {
            message: message.into(),
        }
    }

    pub fn database_query(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::DatabaseQuery {
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_operation(
        queue_name: impl Into<String>,
        operation: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::QueueOperation {
            queue_name: queue_name.into(),
            operation: operation.into(),
            message: message.into(),
        }
    }

    pub fn queue_creation(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "create", message)
    }

    pub fn send(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "send", message)
    }

    pub fn receive(queue_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, "receive", message)
    }

    pub fn ack(queue_name: impl Into<String>, message_id: i64, message: impl Into<String>) -> Self {
        Self::queue_operation(queue_name, format!("ack(msg_id={message_id})"), message)
    }

    pub fn archive(
        queue_name: impl Into<String>,
        message_id: i64,
        message: impl Into<String>,
    ) -> Self {
        Self::queue_operation(queue_name, format!("archive(msg_id={message_id})"), message)
    }

    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::MessageSerialization {
            message: message.into(),
        }
    }

    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::MessageDeserialization {
            message: message.into(),
        }
    }

    pub fn invalid_receipt_handle(handle: impl Into<String>) -> Self {
        Self::InvalidReceiptHandle {
            handle: handle.into(),
        }
    }

    pub fn message_not_found(message_id: impl Into<String>) -> Self {
        Self::MessageNotFound {
            message_id: message_id.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// A payload that cannot be decoded will never decode on a later attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::MessageSerialization { .. }
                | Self::MessageDeserialization { .. }
                | Self::InvalidReceiptHandle { .. }
        )
    }
}

impl From<sqlx::Error> for MessagingError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
                Self::connection(err.to_string())
            }
            other => Self::database_query("sqlx", other.to_string()),
        }
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        Self::deserialization(err.to_string())
    }
}
