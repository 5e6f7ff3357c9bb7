//! # Runtime
//!
//! Wires a [`ConduitConfig`] to live components: one [`Connection`] per
//! configured connection (each with a caller-supplied [`BrokerLink`]), one
//! [`Channel`] per configured channel, and the workflows the caller assigns to
//! each channel. Also the entry point for operator commands.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::channel::Channel;
use crate::config::{ConduitConfig, ConfigManager};
use crate::connection::{BrokerLink, Connection, ConnectionRegistry, RecoveryStatsSnapshot};
use crate::error::{ConduitError, ConduitResult};
use crate::state_machine::{Component, ComponentState, LifecycleCounts};
use crate::workflow::Workflow;

/// Lifecycle snapshot of one component
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentStatus {
    pub name: String,
    pub state: ComponentState,
    pub counts: LifecycleCounts,
}

impl ComponentStatus {
    fn of<C: Component + ?Sized>(component: &C) -> Self {
        Self {
            name: component.name().to_string(),
            state: component.state(),
            counts: component.counts(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    #[serde(flatten)]
    pub component: ComponentStatus,
    pub recovering: bool,
    pub recovery: RecoveryStatsSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelStatus {
    #[serde(flatten)]
    pub component: ComponentStatus,
    pub connection: String,
    pub available: bool,
    pub auto_start: bool,
    pub workflows: Vec<ComponentStatus>,
}

/// Whole-runtime status report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeStatus {
    pub connections: Vec<ConnectionStatus>,
    pub channels: Vec<ChannelStatus>,
}

/// Collects the collaborators the configuration cannot express
pub struct RuntimeBuilder {
    config: ConduitConfig,
    links: HashMap<String, Arc<dyn BrokerLink>>,
    workflows: Vec<(String, Arc<dyn Workflow>)>,
}

impl RuntimeBuilder {
    pub fn new(config: ConduitConfig) -> Self {
        Self {
            config,
            links: HashMap::new(),
            workflows: Vec::new(),
        }
    }

    pub fn from_manager(manager: &ConfigManager) -> Self {
        Self::new(manager.config().clone())
    }

    /// Transport for the connection named `connection`
    pub fn link(mut self, connection: impl Into<String>, link: Arc<dyn BrokerLink>) -> Self {
        self.links.insert(connection.into(), link);
        self
    }

    /// Assign a workflow to the channel named `channel`
    pub fn workflow(mut self, channel: impl Into<String>, workflow: Arc<dyn Workflow>) -> Self {
        self.workflows.push((channel.into(), workflow));
        self
    }

    pub fn build(mut self) -> ConduitResult<ConduitRuntime> {
        self.config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new());
        let mut connection_names: Vec<&String> = self.config.connections.keys().collect();
        connection_names.sort();
        for name in connection_names {
            let link = self.links.remove(name).ok_or_else(|| {
                ConduitError::configuration(
                    format!("connection '{name}'"),
                    "no broker link supplied",
                )
            })?;
            let config = self.config.connections[name].clone();
            registry.register(Connection::new(name.clone(), config, link))?;
        }
        if let Some(unused) = self.links.keys().next() {
            return Err(ConduitError::configuration(
                format!("connection '{unused}'"),
                "broker link supplied for an undeclared connection",
            ));
        }

        let mut channels = BTreeMap::new();
        for (name, channel_config) in &self.config.channels {
            let connection = registry.resolve(&channel_config.connection)?;
            let channel = Channel::new(name.clone(), connection, channel_config.auto_start);
            channels.insert(name.clone(), channel);
        }

        for (channel_name, workflow) in self.workflows {
            let channel = channels.get(&channel_name).ok_or_else(|| {
                ConduitError::configuration(
                    format!("workflow '{}'", workflow.name()),
                    format!("assigned to undeclared channel '{channel_name}'"),
                )
            })?;
            channel.add_workflow(workflow)?;
        }

        info!(
            connections = registry.len(),
            channels = channels.len(),
            "Runtime assembled"
        );
        Ok(ConduitRuntime {
            config: self.config,
            registry,
            channels,
        })
    }
}

/// Assembled set of connections, channels and workflows
#[derive(Debug)]
pub struct ConduitRuntime {
    config: ConduitConfig,
    registry: Arc<ConnectionRegistry>,
    channels: BTreeMap<String, Arc<Channel>>,
}

impl ConduitRuntime {
    pub fn builder(config: ConduitConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    pub fn config(&self) -> &ConduitConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    pub fn connection(&self, name: &str) -> Option<Arc<Connection>> {
        self.registry.get(name)
    }

    pub fn channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).cloned()
    }

    pub fn channel_names(&self) -> Vec<String> {
        self.channels.keys().cloned().collect()
    }

    fn require_channel(&self, name: &str) -> ConduitResult<&Arc<Channel>> {
        self.channels.get(name).ok_or_else(|| {
            ConduitError::configuration("runtime", format!("unknown channel '{name}'"))
        })
    }

    /// Start every channel with `auto_start`; one failure does not stop the rest
    pub async fn start(&self) -> ConduitResult<()> {
        let mut first_error = None;
        for channel in self.channels.values() {
            if !channel.auto_start() {
                info!(channel = %channel.name(), "Channel not auto-started");
                continue;
            }
            if let Err(error) = channel.request_start().await {
                warn!(channel = %channel.name(), error = %error, "Channel failed to start");
                first_error.get_or_insert(error);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub async fn start_channel(&self, name: &str) -> ConduitResult<()> {
        self.require_channel(name)?.request_start().await
    }

    pub async fn stop_channel(&self, name: &str) -> ConduitResult<()> {
        self.require_channel(name)?.request_stop().await
    }

    pub fn toggle_availability(&self, name: &str, available: bool) -> ConduitResult<()> {
        self.require_channel(name)?.toggle_availability(available);
        Ok(())
    }

    /// Close every channel, then every connection
    pub async fn shutdown(&self) -> ConduitResult<()> {
        let mut first_error = None;
        for channel in self.channels.values() {
            if let Err(error) = channel.request_close().await {
                warn!(channel = %channel.name(), error = %error, "Channel failed to close");
                first_error.get_or_insert(error);
            }
        }
        for connection in self.registry.connections() {
            if let Err(error) = connection.request_close().await {
                warn!(
                    connection = %connection.name(),
                    error = %error,
                    "Connection failed to close"
                );
                first_error.get_or_insert(error);
            }
        }
        info!("Runtime shut down");
        first_error.map_or(Ok(()), Err)
    }

    pub fn status(&self) -> RuntimeStatus {
        let mut connections: Vec<ConnectionStatus> = self
            .registry
            .connections()
            .iter()
            .map(|connection| ConnectionStatus {
                component: ComponentStatus::of(connection.as_ref()),
                recovering: connection.is_recovering(),
                recovery: connection.recovery_stats(),
            })
            .collect();
        connections.sort_by(|a, b| a.component.name.cmp(&b.component.name));

        let channels = self
            .channels
            .values()
            .map(|channel| ChannelStatus {
                component: ComponentStatus::of(channel.as_ref()),
                connection: channel.connection().name().to_string(),
                available: channel.is_available(),
                auto_start: channel.auto_start(),
                workflows: channel
                    .workflows()
                    .iter()
                    .map(|workflow| ComponentStatus::of(workflow.as_ref()))
                    .collect(),
            })
            .collect();

        RuntimeStatus {
            connections,
            channels,
        }
    }
}
