//! Services and the ordered chain a workflow runs per message.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::trace;

use crate::error::ConduitResult;
use crate::messaging::Message;

/// One processing step applied to a message in place
///
/// Return [`crate::error::ConduitError::Processing`] for expected, recoverable
/// failures; any other error (or a panic) is treated as unexpected.
#[async_trait]
pub trait Service: Send + Sync {
    fn name(&self) -> &str;

    async fn process(&self, message: &mut Message) -> ConduitResult<()>;
}

/// Ordered list of services; stops at the first failure
#[derive(Clone, Default)]
pub struct ServiceChain {
    services: Vec<Arc<dyn Service>>,
}

impl std::fmt::Debug for ServiceChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.services.iter().map(|s| s.name()))
            .finish()
    }
}

impl ServiceChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style append
    pub fn with(mut self, service: Arc<dyn Service>) -> Self {
        self.services.push(service);
        self
    }

    pub fn push(&mut self, service: Arc<dyn Service>) {
        self.services.push(service);
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub async fn execute(&self, message: &mut Message) -> ConduitResult<()> {
        for service in &self.services {
            trace!(service = %service.name(), message_id = %message.unique_id, "Applying service");
            service.process(message).await?;
        }
        Ok(())
    }
}
