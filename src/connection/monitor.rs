//! Periodic link check for a started connection.

use std::sync::Weak;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::recovery::RecoveryOutcome;
use super::Connection;

/// Background task probing `BrokerLink::check` every `check_interval`
///
/// A failed check runs a recovery cycle inline, so ticks never overlap a cycle
/// started by this monitor. The task ends when cancelled, when the connection is
/// dropped, or when a cycle exhausts its reconnect attempts.
#[derive(Debug)]
pub struct ConnectionFaultMonitor {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl ConnectionFaultMonitor {
    pub fn spawn(connection: Weak<Connection>, name: String, check_interval: Duration) -> Self {
        let token = CancellationToken::new();
        let task_token = token.clone();

        let handle = tokio::spawn(async move {
            info!(
                connection = %name,
                interval_ms = check_interval.as_millis() as u64,
                "Fault monitor started"
            );
            let mut ticker = tokio::time::interval(check_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let Some(connection) = connection.upgrade() else {
                    break;
                };
                if connection.is_recovering() {
                    continue;
                }
                if let Err(error) = connection.link().check().await {
                    warn!(connection = %name, error = %error, "Link check failed");
                    let outcome = connection.on_connection_error().await;
                    if matches!(outcome, RecoveryOutcome::Exhausted { .. }) {
                        break;
                    }
                }
            }
            debug!(connection = %name, "Fault monitor stopped");
        });

        Self { token, handle }
    }

    /// Signal the task to stop; it exits at its next suspension point
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for ConnectionFaultMonitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
