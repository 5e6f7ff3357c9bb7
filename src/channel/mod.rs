//! # Channels
//!
//! A [`Channel`] groups workflows that share one [`Connection`] and an
//! availability gate. Channels are the dependents a connection's recovery cycle
//! stops and restarts; the connection itself is never closed by a channel.

mod context;

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

pub use context::ChannelContext;

use crate::connection::Connection;
use crate::error::{ConduitError, ConduitResult};
use crate::state_machine::{Component, ComponentState, ComponentStateMachine, LifecycleHooks};
use crate::workflow::Workflow;

pub struct Channel {
    lifecycle: ComponentStateMachine,
    auto_start: bool,
    connection: Arc<Connection>,
    workflows: RwLock<Vec<Arc<dyn Workflow>>>,
    availability: watch::Sender<bool>,
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("name", &self.lifecycle.name())
            .field("state", &self.lifecycle.state())
            .field("auto_start", &self.auto_start)
            .field("available", &self.is_available())
            .field("connection", &self.connection.name())
            .field("workflows", &self.workflows.read().len())
            .finish()
    }
}

impl Channel {
    /// Create a channel and register it with its connection
    pub fn new(
        name: impl Into<String>,
        connection: Arc<Connection>,
        auto_start: bool,
    ) -> Arc<Self> {
        let (availability, _) = watch::channel(true);
        let channel = Arc::new(Self {
            lifecycle: ComponentStateMachine::new(name),
            auto_start,
            connection,
            workflows: RwLock::new(Vec::new()),
            availability,
        });
        let dependent: Weak<dyn Component> = Arc::downgrade(&channel) as Weak<dyn Component>;
        channel.connection.register_dependent(dependent);
        channel
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Context handed to workflows owned by this channel
    pub fn context(&self) -> ChannelContext {
        ChannelContext::new(
            self.lifecycle.name().to_string(),
            self.availability.subscribe(),
            Arc::clone(&self.connection),
        )
    }

    /// Attach a workflow; only allowed while the channel is closed
    pub fn add_workflow(&self, workflow: Arc<dyn Workflow>) -> ConduitResult<()> {
        if self.lifecycle.state() != ComponentState::Closed {
            return Err(ConduitError::lifecycle(
                self.lifecycle.name(),
                "add_workflow",
                format!(
                    "channel is {}; workflows can only be added while closed",
                    self.lifecycle.state()
                ),
            ));
        }
        workflow.attach(self.context());
        self.workflows.write().push(workflow);
        Ok(())
    }

    pub fn workflows(&self) -> Vec<Arc<dyn Workflow>> {
        self.workflows.read().clone()
    }

    pub fn is_available(&self) -> bool {
        *self.availability.borrow()
    }

    /// Open or close the availability gate; paused workflows resume on reopen
    pub fn toggle_availability(&self, available: bool) {
        let previous = self.availability.send_replace(available);
        if previous != available {
            info!(
                channel = %self.lifecycle.name(),
                available = available,
                "Channel availability changed"
            );
        }
    }
}

#[async_trait]
impl LifecycleHooks for Channel {
    fn state_machine(&self) -> &ComponentStateMachine {
        &self.lifecycle
    }

    fn auto_start(&self) -> bool {
        self.auto_start
    }

    async fn do_init(&self) -> ConduitResult<()> {
        self.connection.request_init().await?;
        for workflow in self.workflows() {
            workflow.request_init().await?;
        }
        Ok(())
    }

    async fn do_start(&self) -> ConduitResult<()> {
        self.connection.request_start().await?;
        for workflow in self.workflows() {
            workflow.request_start().await?;
        }
        Ok(())
    }

    async fn do_stop(&self) -> ConduitResult<()> {
        let mut first_error = None;
        for workflow in self.workflows() {
            if let Err(error) = workflow.request_stop().await {
                warn!(
                    channel = %self.lifecycle.name(),
                    workflow = %workflow.name(),
                    error = %error,
                    "Workflow failed to stop"
                );
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn do_close(&self) -> ConduitResult<()> {
        let mut first_error = None;
        for workflow in self.workflows() {
            if let Err(error) = workflow.request_close().await {
                warn!(
                    channel = %self.lifecycle.name(),
                    workflow = %workflow.name(),
                    error = %error,
                    "Workflow failed to close"
                );
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;
    use crate::error::ErrorKind;
    use crate::messaging::InMemoryBroker;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn connection(broker: &InMemoryBroker) -> Arc<Connection> {
        Connection::new("conn", ConnectionConfig::default(), Arc::new(broker.link()))
    }

    #[tokio::test]
    async fn test_channel_start_starts_connection_but_close_keeps_it() {
        let broker = InMemoryBroker::new("b");
        let connection = connection(&broker);
        let channel = Channel::new("ch", Arc::clone(&connection), true);
        assert_eq!(connection.dependent_count(), 1);

        channel.request_start().await.unwrap();
        assert_eq!(connection.state(), ComponentState::Started);

        channel.request_close().await.unwrap();
        assert_eq!(channel.state(), ComponentState::Closed);
        assert_eq!(connection.state(), ComponentState::Started);
    }

    #[tokio::test]
    async fn test_channel_init_fails_when_connection_cannot_connect() {
        let broker = InMemoryBroker::new("b");
        broker.set_available(false);
        let channel = Channel::new("ch", connection(&broker), true);

        let err = channel.request_start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
        assert_eq!(channel.state(), ComponentState::Closed);
    }

    #[tokio::test]
    async fn test_gate_wait_wakes_on_reopen() {
        let broker = InMemoryBroker::new("b");
        let channel = Channel::new("ch", connection(&broker), true);
        let context = channel.context();
        let cancel = CancellationToken::new();

        channel.toggle_availability(false);
        assert!(!context.is_available());

        let opener = Arc::clone(&channel);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            opener.toggle_availability(true);
        });

        let waited = tokio::time::timeout(
            Duration::from_secs(2),
            context.wait_until_available(Duration::from_secs(60), &cancel),
        )
        .await
        .expect("gate should reopen well before the max wait");
        assert!(waited);
    }

    #[tokio::test]
    async fn test_gate_wait_is_cancellable() {
        let broker = InMemoryBroker::new("b");
        let channel = Channel::new("ch", connection(&broker), true);
        channel.toggle_availability(false);
        let context = channel.context();
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(!context.wait_until_available(Duration::from_secs(60), &cancel).await);
    }
}
