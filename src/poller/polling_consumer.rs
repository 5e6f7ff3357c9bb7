//! Pull-to-push adapter driven by a [`super::Poller`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, trace};

use super::lock::{DestinationLock, LockClaim};
use super::PollCallback;
use crate::config::PollerConfig;
use crate::error::ConduitResult;
use crate::messaging::{MessageConsumer, MessageListener};

/// Receives a bounded batch per poll and pushes each message to a listener
pub struct PollingConsumer {
    consumer: Arc<dyn MessageConsumer>,
    listener: Arc<dyn MessageListener>,
    lock: Option<Arc<dyn DestinationLock>>,
    max_messages_per_poll: usize,
    reacquire_lock_between_messages: bool,
    receive_timeout: Duration,
}

impl std::fmt::Debug for PollingConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingConsumer")
            .field("destination", &self.consumer.destination())
            .field("locked", &self.lock.is_some())
            .field("max_messages_per_poll", &self.max_messages_per_poll)
            .field("reacquire_lock_between_messages", &self.reacquire_lock_between_messages)
            .finish()
    }
}

impl PollingConsumer {
    pub fn new(
        consumer: Arc<dyn MessageConsumer>,
        listener: Arc<dyn MessageListener>,
        config: &PollerConfig,
    ) -> Self {
        Self {
            consumer,
            listener,
            lock: None,
            max_messages_per_poll: config.max_messages_per_poll.max(1),
            reacquire_lock_between_messages: config.reacquire_lock_between_messages,
            receive_timeout: Duration::ZERO,
        }
    }

    pub fn with_lock(mut self, lock: Arc<dyn DestinationLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    /// How long each receive may wait; zero polls without blocking
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout = timeout;
        self
    }

    pub fn consumer(&self) -> &Arc<dyn MessageConsumer> {
        &self.consumer
    }

    async fn claim(&self) -> ClaimAttempt {
        match &self.lock {
            None => ClaimAttempt::Claimed(None),
            Some(lock) => match lock.try_acquire().await {
                Some(claim) => ClaimAttempt::Claimed(Some(claim)),
                None => ClaimAttempt::Busy,
            },
        }
    }
}

/// Outcome of trying to claim the destination before receiving
enum ClaimAttempt {
    /// Free to receive; holds the claim when a lock is configured
    Claimed(Option<LockClaim>),
    /// Another consumer holds the destination
    Busy,
}

#[async_trait]
impl PollCallback for PollingConsumer {
    async fn invoke(&self) -> ConduitResult<usize> {
        let ClaimAttempt::Claimed(mut claim) = self.claim().await else {
            debug!(
                destination = %self.consumer.destination(),
                "Destination locked elsewhere; skipping poll"
            );
            return Ok(0);
        };

        let mut handled = 0;
        while handled < self.max_messages_per_poll {
            if !self.listener.await_ready().await {
                break;
            }
            if self.reacquire_lock_between_messages && handled > 0 && self.lock.is_some() {
                drop(claim.take());
                match self.claim().await {
                    ClaimAttempt::Claimed(reclaimed) => claim = reclaimed,
                    ClaimAttempt::Busy => break,
                }
            }

            let received = match self.consumer.receive(self.receive_timeout).await {
                Ok(received) => received,
                Err(error) => {
                    self.listener.on_receive_error(&error);
                    return Err(error.into());
                }
            };
            match received {
                Some(message) => {
                    trace!(
                        destination = %self.consumer.destination(),
                        message_id = %message.unique_id,
                        "Polled message"
                    );
                    self.listener.on_message(message).await;
                    handled += 1;
                }
                None => break,
            }
        }
        drop(claim);
        Ok(handled)
    }
}
