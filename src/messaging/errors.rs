//! # Messaging Error Types
//!
//! Structured errors raised by consumers, producers and broker links. They are
//! converted into [`crate::error::ConduitError`] at the workflow boundary, where the
//! connection faults become `TransientConnection` and send failures become `Produce`.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MessagingError {
    #[error("Connection lost: {connection}: {message}")]
    ConnectionLost { connection: String, message: String },

    #[error("Queue not found: {queue_name}")]
    QueueNotFound { queue_name: String },

    #[error("Send failed for {destination}: {message}")]
    SendFailed {
        destination: String,
        message: String,
    },

    #[error("Receive failed for {destination}: {message}")]
    ReceiveFailed {
        destination: String,
        message: String,
    },

    #[error("Transaction {operation} failed: {message}")]
    Transaction { operation: String, message: String },

    #[error("Message serialization error: {message}")]
    MessageSerialization { message: String },

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },

    #[error("Timeout: operation {operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Internal messaging error: {message}")]
    Internal { message: String },
}

impl MessagingError {
    /// Create a connection lost error
    pub fn connection_lost(connection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionLost {
            connection: connection.into(),
            message: message.into(),
        }
    }

    /// Create a queue not found error
    pub fn queue_not_found(queue_name: impl Into<String>) -> Self {
        Self::QueueNotFound {
            queue_name: queue_name.into(),
        }
    }

    /// Create a send failure
    pub fn send_failed(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SendFailed {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create a receive failure
    pub fn receive_failed(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ReceiveFailed {
            destination: destination.into(),
            message: message.into(),
        }
    }

    /// Create a transaction (commit/rollback) failure
    pub fn transaction(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transaction {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms,
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether this error means the broker link itself is unusable
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, Self::ConnectionLost { .. } | Self::Timeout { .. })
    }
}

impl From<serde_json::Error> for MessagingError {
    fn from(err: serde_json::Error) -> Self {
        MessagingError::MessageSerialization {
            message: err.to_string(),
        }
    }
}

/// Result type alias for messaging operations
pub type MessagingResult<T> = Result<T, MessagingError>;
