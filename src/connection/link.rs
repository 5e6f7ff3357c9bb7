//! Broker transport contract used by [`super::Connection`].

use std::sync::Weak;

use async_trait::async_trait;

use crate::messaging::MessagingResult;

/// Asynchronous failure notification raised by a transport
pub trait ConnectionFailureListener: Send + Sync {
    fn on_connection_failure(&self, reason: &str);
}

/// Physical link to a broker
///
/// Implementations report faults either by failing `check()` or by calling the
/// registered [`ConnectionFailureListener`] when the transport notices the loss
/// on its own.
#[async_trait]
pub trait BrokerLink: Send + Sync + std::fmt::Debug {
    /// Human readable address for logs
    fn describe(&self) -> String;

    async fn connect(&self) -> MessagingResult<()>;

    /// Best-effort teardown; never fails
    async fn disconnect(&self);

    /// Cheap liveness probe used by the periodic fault monitor
    async fn check(&self) -> MessagingResult<()>;

    /// Register the callback for transport-detected failures
    fn set_failure_listener(&self, _listener: Weak<dyn ConnectionFailureListener>) {}
}
