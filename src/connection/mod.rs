//! # Connections and Recovery
//!
//! Broker connections, their fault detection (periodic check or transport
//! callback) and the recovery protocol that restarts dependent channels.

mod broker_connection;
pub mod link;
pub mod monitor;
pub mod recovery;
pub mod registry;

pub use crate::config::{ConnectionConfig, ConnectionErrorHandlerConfig};
pub use broker_connection::Connection;
pub use link::{BrokerLink, ConnectionFailureListener};
pub use monitor::ConnectionFaultMonitor;
pub use recovery::{
    RecoveryCoordinator, RecoveryGuard, RecoveryOutcome, RecoverySession, RecoveryStats,
    RecoveryStatsSnapshot,
};
pub use registry::ConnectionRegistry;
