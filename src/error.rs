//! # Error Types
//!
//! A single tagged error type for the runtime. Every failure carries an explicit
//! [`ErrorKind`] so the transaction policy and the recovery protocol can dispatch on
//! the category instead of on the concrete error value.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::messaging::MessagingError;

/// Failure category used by the decision table and the recovery protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Broker link is unusable; recovered by the connection's recovery cycle
    TransientConnection,
    /// A lifecycle hook (init/start/stop/close) failed
    Lifecycle,
    /// Expected, recoverable service failure
    Processing,
    /// The producer could not send the message
    Produce,
    /// Anything else, including panics caught inside a service
    Unexpected,
    /// Invalid or missing configuration, detected before a component starts
    Configuration,
}

impl ErrorKind {
    /// Only connection faults are retried automatically
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientConnection)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::TransientConnection => "transient_connection",
            Self::Lifecycle => "lifecycle",
            Self::Processing => "processing",
            Self::Produce => "produce",
            Self::Unexpected => "unexpected",
            Self::Configuration => "configuration",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConduitError {
    #[error("Connection error on {connection}: {message}")]
    TransientConnection { connection: String, message: String },

    #[error("Lifecycle error: {component} failed to {transition}: {message}")]
    Lifecycle {
        component: String,
        transition: String,
        message: String,
    },

    #[error("Processing error in {service}: {message}")]
    Processing { service: String, message: String },

    #[error("Produce error for {destination}: {message}")]
    Produce {
        destination: String,
        message: String,
    },

    #[error("Unexpected error: {0}")]
    Unexpected(String),

    #[error("Configuration error: {component}: {message}")]
    Configuration { component: String, message: String },
}

impl ConduitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TransientConnection { .. } => ErrorKind::TransientConnection,
            Self::Lifecycle { .. } => ErrorKind::Lifecycle,
            Self::Processing { .. } => ErrorKind::Processing,
            Self::Produce { .. } => ErrorKind::Produce,
            Self::Unexpected(_) => ErrorKind::Unexpected,
            Self::Configuration { .. } => ErrorKind::Configuration,
        }
    }

    pub fn transient_connection(connection: impl Into<String>, message: impl Into<String>) -> Self {
        Self::TransientConnection {
            connection: connection.into(),
            message: message.into(),
        }
    }

    pub fn lifecycle(
        component: impl Into<String>,
        transition: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Lifecycle {
            component: component.into(),
            transition: transition.into(),
            message: message.into(),
        }
    }

    /// Create a checked processing failure
    pub fn processing(service: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Processing {
            service: service.into(),
            message: message.into(),
        }
    }

    pub fn produce(destination: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Produce {
            destination: destination.into(),
            message: message.into(),
        }
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    pub fn configuration(component: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Configuration {
            component: component.into(),
            message: message.into(),
        }
    }

    /// Build an error from a caught panic payload
    pub fn from_panic(context: &str, payload: Box<dyn std::any::Any + Send>) -> Self {
        let detail = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        Self::Unexpected(format!("{context} panicked: {detail}"))
    }
}

impl From<MessagingError> for ConduitError {
    fn from(err: MessagingError) -> Self {
        match &err {
            MessagingError::ConnectionLost { connection, message } => {
                ConduitError::transient_connection(connection.clone(), message.clone())
            }
            MessagingError::SendFailed { destination, message } => {
                ConduitError::produce(destination.clone(), message.clone())
            }
            MessagingError::Configuration { component, message } => {
                ConduitError::configuration(component.clone(), message.clone())
            }
            _ => ConduitError::unexpected(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConduitError {
    fn from(error: serde_json::Error) -> Self {
        ConduitError::unexpected(format!("JSON serialization error: {error}"))
    }
}

pub type ConduitResult<T> = Result<T, ConduitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            ConduitError::processing("svc", "bad").kind(),
            ErrorKind::Processing
        );
        assert_eq!(
            ConduitError::produce("out", "down").kind(),
            ErrorKind::Produce
        );
        assert_eq!(
            ConduitError::configuration("channel", "missing").kind(),
            ErrorKind::Configuration
        );
        assert!(ConduitError::transient_connection("c1", "gone")
            .kind()
            .is_transient());
        assert!(!ConduitError::unexpected("boom").kind().is_transient());
    }

    #[test]
    fn test_messaging_error_conversion() {
        let err: ConduitError = MessagingError::connection_lost("broker", "socket reset").into();
        assert_eq!(err.kind(), ErrorKind::TransientConnection);

        let err: ConduitError = MessagingError::send_failed("out", "queue full").into();
        assert_eq!(err.kind(), ErrorKind::Produce);

        let err: ConduitError = MessagingError::queue_not_found("nowhere").into();
        assert_eq!(err.kind(), ErrorKind::Unexpected);
    }

    #[test]
    fn test_panic_payload_is_captured() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("kaboom");
        let err = ConduitError::from_panic("service 'x'", payload);
        assert_eq!(err.kind(), ErrorKind::Unexpected);
        assert!(err.to_string().contains("kaboom"));
    }

    #[test]
    fn test_error_display() {
        let err = ConduitError::lifecycle("channel-a", "start", "consumer refused");
        let display = format!("{err}");
        assert!(display.contains("channel-a"));
        assert!(display.contains("start"));
        assert!(display.contains("consumer refused"));
        assert_eq!(ErrorKind::Processing.to_string(), "processing");
    }
}
