#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Conduit Core
//!
//! Runtime core of an integration middleware: it connects to message brokers,
//! runs processing pipelines ("workflows") over received messages and
//! re-publishes the results, surviving broker outages without losing messages.
//!
//! ## Architecture
//!
//! Every stateful entity (connection, channel, workflow, poller) embeds a
//! [`state_machine::ComponentStateMachine`] and moves through
//! `Closed -> Initialised -> Started` and back. A [`connection::Connection`]
//! detects broker faults and runs a recovery cycle over the channels registered
//! against it. Channels gate their workflows; transacted workflows commit or
//! roll back every message according to the chain outcome and the strict flag.
//!
//! ## Module Organization
//!
//! - [`state_machine`] - Component lifecycle states, transitions and counters
//! - [`connection`] - Broker connections, fault monitor, recovery coordinator, registry
//! - [`channel`] - Channels and their availability gate
//! - [`workflow`] - Service chains, transacted and standard workflows, error handlers
//! - [`poller`] - Scheduled polling and destination locks
//! - [`messaging`] - Messages, consumer/producer traits, in-memory broker
//! - [`runtime`] - Assembly from configuration and operator commands
//! - [`config`] - Configuration structures and loading
//! - [`error`] - Tagged error type
//! - [`logging`] - Structured logging setup
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use conduit_core::config::{ChannelConfig, ConduitConfig, ConnectionConfig};
//! use conduit_core::messaging::InMemoryBroker;
//! use conduit_core::runtime::ConduitRuntime;
//! use conduit_core::workflow::TransactedWorkflow;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut config = ConduitConfig::default();
//! config.connections.insert("broker".into(), ConnectionConfig::default());
//! config.channels.insert(
//!     "orders".into(),
//!     ChannelConfig { connection: "broker".into(), auto_start: true },
//! );
//!
//! let broker = InMemoryBroker::new("local");
//! let session = broker.session(true);
//! let workflow = TransactedWorkflow::builder(
//!     "orders-in",
//!     Arc::new(session.consumer("orders.in")),
//!     Arc::new(session.producer("orders.out")),
//! )
//! .settings(config.workflow.clone())
//! .build();
//!
//! let runtime = ConduitRuntime::builder(config)
//!     .link("broker", Arc::new(broker.link()))
//!     .workflow("orders", workflow)
//!     .build()?;
//! runtime.start().await?;
//! runtime.shutdown().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Testing
//!
//! ```bash
//! cargo test --lib    # Unit tests
//! cargo test          # Unit and integration tests (in-memory broker)
//! ```

pub mod channel;
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod messaging;
pub mod poller;
pub mod runtime;
pub mod state_machine;
pub mod workflow;

pub use channel::{Channel, ChannelContext};
pub use config::{ConduitConfig, ConfigManager};
pub use connection::{BrokerLink, Connection, ConnectionRegistry, RecoveryOutcome};
pub use error::{ConduitError, ConduitResult, ErrorKind};
pub use messaging::{Message, MessagingError};
pub use poller::{PollCallback, PollSchedule, Poller, PollingConsumer};
pub use runtime::{ConduitRuntime, RuntimeBuilder};
pub use state_machine::{Component, ComponentState, LifecycleHooks};
pub use workflow::{
    Service, ServiceChain, StandardWorkflow, TransactedWorkflow, TransactionDecision, Workflow,
};
