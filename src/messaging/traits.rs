//! # Messaging Collaborator Traits
//!
//! Provider-agnostic contracts for the consumers and producers a workflow drives.
//! Broker bindings implement these; the runtime never sees a wire format.

use std::time::Duration;

use async_trait::async_trait;

use super::{Message, MessagingError, MessagingResult};

/// Pull-style consumer bound to one destination
///
/// `init` and `close` are called from the owning workflow's lifecycle hooks. A
/// consumer that needs no session setup can rely on the defaults.
#[async_trait]
pub trait MessageConsumer: Send + Sync {
    /// Destination name for logging
    fn destination(&self) -> &str;

    /// Open the underlying session
    async fn init(&self) -> MessagingResult<()> {
        Ok(())
    }

    /// Release the underlying session
    async fn close(&self) {}

    /// Receive at most one message, waiting up to `timeout`
    ///
    /// Returns `Ok(None)` when nothing arrived in time. Connection problems must be
    /// reported as [`super::MessagingError::ConnectionLost`] so the workflow can
    /// trigger recovery.
    async fn receive(&self, timeout: Duration) -> MessagingResult<Option<Message>>;
}

/// Consumer participating in a broker transaction
///
/// Everything received since the last `commit`/`rollback`, and everything sent by
/// producers bound to the same session, is settled together.
#[async_trait]
pub trait TransactionalConsumer: MessageConsumer {
    async fn commit(&self) -> MessagingResult<()>;

    /// Undo the current transaction; received messages become available again
    async fn rollback(&self) -> MessagingResult<()>;
}

/// Producer bound to one destination
#[async_trait]
pub trait MessageProducer: Send + Sync {
    fn destination(&self) -> &str;

    async fn init(&self) -> MessagingResult<()> {
        Ok(())
    }

    async fn close(&self) {}

    async fn send(&self, message: &Message) -> MessagingResult<()>;
}

/// Push-style receiver of messages
#[async_trait]
pub trait MessageListener: Send + Sync {
    async fn on_message(&self, message: Message);

    /// Wait until the listener can accept another message
    ///
    /// Returns false when the listener is shutting down and no further messages
    /// should be fetched for it.
    async fn await_ready(&self) -> bool {
        true
    }

    /// Told about a failed receive before the poll cycle reports it
    fn on_receive_error(&self, _error: &MessagingError) {}
}
