//! Alternate route for messages that failed processing.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::service::ServiceChain;
use crate::error::{ConduitError, ConduitResult};
use crate::messaging::{Message, MessageProducer, MessagingResult};

/// Metadata key carrying the failure category
pub const ERROR_KIND_KEY: &str = "conduit.error.kind";
/// Metadata key carrying the failure description
pub const ERROR_MESSAGE_KEY: &str = "conduit.error.message";

/// Receives messages whose processing failed
///
/// For transacted workflows the handler runs inside the consumer's transaction:
/// returning `Ok` lets the workflow commit, an error makes it roll back.
#[async_trait]
pub trait MessageErrorHandler: Send + Sync {
    async fn init(&self) -> MessagingResult<()> {
        Ok(())
    }

    async fn close(&self) {}

    async fn handle(&self, message: &Message, error: &ConduitError) -> ConduitResult<()>;
}

/// Stamps the failure onto the message, runs its own chain, then produces
#[derive(Clone)]
pub struct StandardMessageErrorHandler {
    chain: ServiceChain,
    producer: Arc<dyn MessageProducer>,
}

impl std::fmt::Debug for StandardMessageErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardMessageErrorHandler")
            .field("chain", &self.chain)
            .field("destination", &self.producer.destination())
            .finish()
    }
}

impl StandardMessageErrorHandler {
    pub fn new(producer: Arc<dyn MessageProducer>) -> Self {
        Self {
            chain: ServiceChain::new(),
            producer,
        }
    }

    pub fn with_chain(mut self, chain: ServiceChain) -> Self {
        self.chain = chain;
        self
    }
}

#[async_trait]
impl MessageErrorHandler for StandardMessageErrorHandler {
    async fn init(&self) -> MessagingResult<()> {
        self.producer.init().await
    }

    async fn close(&self) {
        self.producer.close().await;
    }

    async fn handle(&self, message: &Message, error: &ConduitError) -> ConduitResult<()> {
        let mut failed = message.clone();
        failed.set_metadata(ERROR_KIND_KEY, error.kind().to_string());
        failed.set_metadata(ERROR_MESSAGE_KEY, error.to_string());

        self.chain.execute(&mut failed).await?;
        if failed.skip_production() {
            return Ok(());
        }

        debug!(
            message_id = %failed.unique_id,
            destination = %self.producer.destination(),
            "Routing failed message to error destination"
        );
        self.producer
            .send(&failed)
            .await
            .map_err(|e| ConduitError::produce(self.producer.destination(), e.to_string()))
    }
}
