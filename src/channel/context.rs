use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::connection::Connection;
use crate::state_machine::Component;

/// What a channel hands to each of its workflows
#[derive(Debug, Clone)]
pub struct ChannelContext {
    channel: String,
    availability: watch::Receiver<bool>,
    connection: Arc<Connection>,
}

impl ChannelContext {
    pub(crate) fn new(
        channel: String,
        availability: watch::Receiver<bool>,
        connection: Arc<Connection>,
    ) -> Self {
        Self {
            channel,
            availability,
            connection,
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    pub fn is_available(&self) -> bool {
        *self.availability.borrow()
    }

    /// Forward a connection fault seen by a workflow to the recovery coordinator
    pub fn report_fault(&self, reason: &str) {
        self.connection.report_fault(reason);
    }

    /// Block while the channel is unavailable
    ///
    /// Sleeps at most `max_wait` per round before re-checking, and wakes early
    /// when the gate opens. Returns false when `cancel` fires first.
    pub async fn wait_until_available(
        &self,
        max_wait: Duration,
        cancel: &CancellationToken,
    ) -> bool {
        let mut availability = self.availability.clone();
        loop {
            if *availability.borrow_and_update() {
                return true;
            }
            debug!(
                channel = %self.channel,
                connection = %self.connection.name(),
                "Channel unavailable; waiting"
            );
            tokio::select! {
                _ = cancel.cancelled() => return false,
                changed = availability.changed() => {
                    if changed.is_err() {
                        // channel dropped; nothing will ever reopen the gate
                        return !cancel.is_cancelled();
                    }
                }
                _ = tokio::time::sleep(max_wait) => {}
            }
        }
    }
}
