//! # Conduit Configuration
//!
//! Serde structures for every externally supplied value the runtime consumes:
//! connection retry settings, channel bindings, transacted workflow policy and
//! poller schedules. Durations are expressed as integer milliseconds (`*_ms`).
//!
//! ## Usage
//!
//! ```rust,no_run
//! use conduit_core::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ConfigManager::load_from_file("config/conduit.toml")?;
//! let workflow = &manager.config().workflow;
//! println!("strict={} rollback_wait={:?}", workflow.strict, workflow.rollback_wait());
//! # Ok(())
//! # }
//! ```

pub mod loader;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{ConduitError, ConduitResult};

pub use loader::ConfigManager;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConduitConfig {
    /// Connections by logical name; channels refer to these names
    pub connections: HashMap<String, ConnectionConfig>,

    /// Channels by name
    pub channels: HashMap<String, ChannelConfig>,

    /// Defaults applied to transacted workflows
    pub workflow: WorkflowConfig,

    /// Defaults applied to pollers
    pub poller: PollerConfig,
}

impl ConduitConfig {
    /// Validate every section and the cross references between them
    pub fn validate(&self) -> ConduitResult<()> {
        for (name, connection) in &self.connections {
            connection.validate(name)?;
        }
        for (name, channel) in &self.channels {
            if !self.connections.contains_key(&channel.connection) {
                return Err(ConduitError::configuration(
                    format!("channel '{name}'"),
                    format!("references unknown connection '{}'", channel.connection),
                ));
            }
        }
        self.workflow.validate()?;
        self.poller.validate()?;
        Ok(())
    }
}

/// Retry and fault-detection settings of one broker connection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Pause between reconnect attempts
    pub retry_interval_ms: u64,

    /// Reconnect attempts per recovery cycle; unbounded when absent
    pub max_attempts: Option<u32>,

    pub error_handler: ConnectionErrorHandlerConfig,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            retry_interval_ms: 60_000,
            max_attempts: None,
            error_handler: ConnectionErrorHandlerConfig::default(),
        }
    }
}

impl ConnectionConfig {
    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn validate(&self, name: &str) -> ConduitResult<()> {
        let component = format!("connection '{name}'");
        if self.retry_interval_ms == 0 {
            return Err(ConduitError::configuration(
                component,
                "retry_interval_ms must be greater than zero",
            ));
        }
        if self.max_attempts == Some(0) {
            return Err(ConduitError::configuration(
                component,
                "max_attempts must be at least 1 (omit it for unbounded retries)",
            ));
        }
        if self.error_handler.check_interval_ms == Some(0) {
            return Err(ConduitError::configuration(
                component,
                "error_handler.check_interval_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Connection error handler settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionErrorHandlerConfig {
    /// Interval of the periodic link check; no periodic check when absent
    pub check_interval_ms: Option<u64>,

    /// Allow only one recovery cycle per connection at a time
    pub single_execution: bool,
}

impl Default for ConnectionErrorHandlerConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: None,
            single_execution: true,
        }
    }
}

impl ConnectionErrorHandlerConfig {
    pub fn check_interval(&self) -> Option<Duration> {
        self.check_interval_ms.map(Duration::from_millis)
    }
}

/// Binding of a channel to its connection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ChannelConfig {
    /// Logical connection name
    pub connection: String,

    #[serde(default = "default_true")]
    pub auto_start: bool,
}

fn default_true() -> bool {
    true
}

/// Transacted workflow policy
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// Roll back on every processing failure, ignoring any error handler
    pub strict: bool,

    /// Pause after a rollback before the next receive
    pub rollback_wait_ms: u64,

    /// Maximum single wait while the channel is unavailable before re-checking
    pub channel_unavailable_wait_ms: u64,

    /// Receive timeout per poll of the consumer
    pub receive_timeout_ms: u64,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            strict: true,
            rollback_wait_ms: 30_000,
            channel_unavailable_wait_ms: 60_000,
            receive_timeout_ms: 1_000,
        }
    }
}

impl WorkflowConfig {
    pub fn rollback_wait(&self) -> Duration {
        Duration::from_millis(self.rollback_wait_ms)
    }

    pub fn channel_unavailable_wait(&self) -> Duration {
        Duration::from_millis(self.channel_unavailable_wait_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn validate(&self) -> ConduitResult<()> {
        if self.channel_unavailable_wait_ms == 0 {
            return Err(ConduitError::configuration(
                "workflow",
                "channel_unavailable_wait_ms must be greater than zero",
            ));
        }
        if self.receive_timeout_ms == 0 {
            return Err(ConduitError::configuration(
                "workflow",
                "receive_timeout_ms must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Poller schedule and batch settings
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollerConfig {
    /// Fixed interval, or lower bound of the random interval
    pub interval_ms: u64,

    /// Upper bound of a random interval; fixed schedule when absent
    pub random_max_interval_ms: Option<u64>,

    pub max_messages_per_poll: usize,

    /// Release and re-claim the destination lock around every message
    pub reacquire_lock_between_messages: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 10_000,
            random_max_interval_ms: None,
            max_messages_per_poll: 10,
            reacquire_lock_between_messages: false,
        }
    }
}

impl PollerConfig {
    pub fn validate(&self) -> ConduitResult<()> {
        if self.interval_ms == 0 {
            return Err(ConduitError::configuration(
                "poller",
                "interval_ms must be greater than zero",
            ));
        }
        if let Some(max) = self.random_max_interval_ms {
            if max < self.interval_ms {
                return Err(ConduitError::configuration(
                    "poller",
                    format!(
                        "random_max_interval_ms ({max}) must not be below interval_ms ({})",
                        self.interval_ms
                    ),
                ));
            }
        }
        if self.max_messages_per_poll == 0 {
            return Err(ConduitError::configuration(
                "poller",
                "max_messages_per_poll must be greater than zero",
            ));
        }
        Ok(())
    }
}

impl From<config::ConfigError> for ConduitError {
    fn from(err: config::ConfigError) -> Self {
        ConduitError::configuration("config", err.to_string())
    }
}
