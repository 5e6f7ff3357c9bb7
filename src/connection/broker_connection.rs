//! # Broker Connection
//!
//! A [`Connection`] is a lifecycle component wrapping a [`BrokerLink`]. Channels
//! register themselves as dependents (held weakly); when the link fails the
//! connection's [`RecoveryCoordinator`] takes every started dependent down,
//! reconnects and brings them back.

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::link::{BrokerLink, ConnectionFailureListener};
use super::monitor::ConnectionFaultMonitor;
use super::recovery::{RecoveryCoordinator, RecoveryOutcome, RecoveryStatsSnapshot};
use crate::config::ConnectionConfig;
use crate::error::{ConduitError, ConduitResult};
use crate::state_machine::{Component, ComponentState, ComponentStateMachine, LifecycleHooks};

/// Forwards transport-detected failures to the owning connection
struct ConnectionFaultListener {
    connection: Weak<Connection>,
}

impl ConnectionFailureListener for ConnectionFaultListener {
    fn on_connection_failure(&self, reason: &str) {
        if let Some(connection) = self.connection.upgrade() {
            connection.report_fault(reason);
        }
    }
}

/// Shared, recoverable connection to one broker
pub struct Connection {
    lifecycle: ComponentStateMachine,
    config: ConnectionConfig,
    link: Arc<dyn BrokerLink>,
    dependents: RwLock<Vec<Weak<dyn Component>>>,
    coordinator: RecoveryCoordinator,
    monitor: Mutex<Option<ConnectionFaultMonitor>>,
    /// Cancelled on close; replaced on every init
    shutdown: Mutex<CancellationToken>,
    self_ref: Weak<Connection>,
    _fault_listener: Arc<ConnectionFaultListener>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.lifecycle.name())
            .field("state", &self.lifecycle.state())
            .field("link", &self.link.describe())
            .field("dependents", &self.dependents.read().len())
            .field("recovering", &self.coordinator.is_recovering())
            .finish()
    }
}

impl Connection {
    pub fn new(
        name: impl Into<String>,
        config: ConnectionConfig,
        link: Arc<dyn BrokerLink>,
    ) -> Arc<Self> {
        let name = name.into();
        Arc::new_cyclic(|weak: &Weak<Connection>| {
            let fault_listener = Arc::new(ConnectionFaultListener {
                connection: weak.clone(),
            });
            let listener: Arc<dyn ConnectionFailureListener> = fault_listener.clone();
            link.set_failure_listener(Arc::downgrade(&listener));

            Self {
                lifecycle: ComponentStateMachine::new(name),
                coordinator: RecoveryCoordinator::new(config.error_handler.single_execution),
                config,
                link,
                dependents: RwLock::new(Vec::new()),
                monitor: Mutex::new(None),
                shutdown: Mutex::new(CancellationToken::new()),
                self_ref: weak.clone(),
                _fault_listener: fault_listener,
            }
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn link(&self) -> &Arc<dyn BrokerLink> {
        &self.link
    }

    /// Register a component to be taken down and restarted by recovery cycles
    pub fn register_dependent(&self, dependent: Weak<dyn Component>) {
        let mut dependents = self.dependents.write();
        dependents.retain(|d| d.strong_count() > 0);
        dependents.push(dependent);
    }

    pub fn dependent_count(&self) -> usize {
        self.dependents
            .read()
            .iter()
            .filter(|d| d.strong_count() > 0)
            .count()
    }

    /// Live dependents currently in the Started state
    pub fn started_dependents(&self) -> Vec<Arc<dyn Component>> {
        self.dependents
            .read()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|d| d.state() == ComponentState::Started)
            .collect()
    }

    pub fn is_recovering(&self) -> bool {
        self.coordinator.is_recovering()
    }

    pub fn recovery_stats(&self) -> RecoveryStatsSnapshot {
        self.coordinator.stats()
    }

    /// Report a fault noticed outside the monitor; recovery runs on its own task
    pub fn report_fault(&self, reason: &str) {
        if self.lifecycle.state() != ComponentState::Started {
            debug!(
                connection = %self.lifecycle.name(),
                reason = %reason,
                "Fault reported while not started; ignoring"
            );
            return;
        }
        let Some(connection) = self.self_ref.upgrade() else {
            return;
        };
        match Handle::try_current() {
            Ok(handle) => {
                warn!(
                    connection = %self.lifecycle.name(),
                    reason = %reason,
                    "Connection fault reported"
                );
                handle.spawn(async move {
                    connection.on_connection_error().await;
                });
            }
            Err(_) => {
                warn!(
                    connection = %self.lifecycle.name(),
                    reason = %reason,
                    "Connection fault reported outside a tokio runtime; recovery not scheduled"
                );
            }
        }
    }

    /// Run one recovery cycle
    pub async fn on_connection_error(&self) -> RecoveryOutcome {
        if self.lifecycle.state() != ComponentState::Started {
            return RecoveryOutcome::Inactive;
        }
        let cancel = self.shutdown.lock().clone();
        let outcome = self.coordinator.run(self, cancel).await;
        if matches!(outcome, RecoveryOutcome::Exhausted { .. }) {
            self.close_after_exhaustion().await;
        }
        outcome
    }

    /// Return to Closed so the next dependent start reconnects and re-arms the monitor
    async fn close_after_exhaustion(&self) {
        match self.lifecycle.request_close(self).await {
            Ok(()) => info!(
                connection = %self.lifecycle.name(),
                "Connection closed after exhausted recovery; restart a channel to reconnect"
            ),
            Err(error) => {
                warn!(
                    connection = %self.lifecycle.name(),
                    error = %error,
                    "Failed to close connection after exhausted recovery"
                );
                self.cancel_monitor();
            }
        }
    }

    fn cancel_monitor(&self) {
        if let Some(monitor) = self.monitor.lock().take() {
            monitor.cancel();
        }
    }
}

#[async_trait]
impl LifecycleHooks for Connection {
    fn state_machine(&self) -> &ComponentStateMachine {
        &self.lifecycle
    }

    async fn do_init(&self) -> ConduitResult<()> {
        self.config.validate(self.lifecycle.name())?;
        *self.shutdown.lock() = CancellationToken::new();
        self.link.connect().await.map_err(ConduitError::from)?;
        info!(
            connection = %self.lifecycle.name(),
            link = %self.link.describe(),
            "Connection established"
        );
        Ok(())
    }

    async fn do_start(&self) -> ConduitResult<()> {
        if let Some(interval) = self.config.error_handler.check_interval() {
            let monitor = ConnectionFaultMonitor::spawn(
                self.self_ref.clone(),
                self.lifecycle.name().to_string(),
                interval,
            );
            if let Some(previous) = self.monitor.lock().replace(monitor) {
                previous.cancel();
            }
        }
        Ok(())
    }

    async fn do_stop(&self) -> ConduitResult<()> {
        self.cancel_monitor();
        Ok(())
    }

    async fn do_close(&self) -> ConduitResult<()> {
        self.cancel_monitor();
        self.shutdown.lock().cancel();
        self.link.disconnect().await;
        info!(connection = %self.lifecycle.name(), "Connection closed");
        Ok(())
    }
}
