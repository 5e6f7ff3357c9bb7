#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use conduit_core::config::{
    ChannelConfig, ConduitConfig, ConnectionConfig, ConnectionErrorHandlerConfig, PollerConfig,
    WorkflowConfig,
};
use conduit_core::messaging::{InMemoryBroker, Message};
use conduit_core::workflow::{ServiceChain, StandardMessageErrorHandler, TransactedWorkflow};
use tracing::Level;

pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .with_test_writer()
        .try_init();
}

/// Connection settings tuned for fast outage tests
pub fn fast_connection(max_attempts: Option<u32>) -> ConnectionConfig {
    ConnectionConfig {
        retry_interval_ms: 50,
        max_attempts,
        error_handler: ConnectionErrorHandlerConfig {
            check_interval_ms: Some(50),
            single_execution: true,
        },
    }
}

pub fn fast_workflow(strict: bool) -> WorkflowConfig {
    WorkflowConfig {
        strict,
        rollback_wait_ms: 5,
        channel_unavailable_wait_ms: 50,
        receive_timeout_ms: 20,
    }
}

pub fn fast_poller() -> PollerConfig {
    PollerConfig {
        interval_ms: 5,
        random_max_interval_ms: None,
        max_messages_per_poll: 10,
        reacquire_lock_between_messages: false,
    }
}

/// One connection named `broker` with the given channels as `(name, auto_start)`
pub fn runtime_config(connection: ConnectionConfig, channels: &[(&str, bool)]) -> ConduitConfig {
    let mut config = ConduitConfig::default();
    config.connections.insert("broker".to_string(), connection);
    for (name, auto_start) in channels {
        config.channels.insert(
            (*name).to_string(),
            ChannelConfig {
                connection: "broker".to_string(),
                auto_start: *auto_start,
            },
        );
    }
    config.workflow = fast_workflow(true);
    config
}

/// Transacted workflow reading `source` and producing to `target` on one session
pub fn transacted(
    broker: &InMemoryBroker,
    name: &str,
    source: &str,
    target: &str,
    settings: WorkflowConfig,
    chain: ServiceChain,
) -> Arc<TransactedWorkflow> {
    let session = broker.session(true);
    TransactedWorkflow::builder(
        name,
        Arc::new(session.consumer(source)),
        Arc::new(session.producer(target)),
    )
    .settings(settings)
    .chain(chain)
    .build()
}

/// Same as [`transacted`], with an error handler producing to `errors` inside the transaction
pub fn transacted_with_errors(
    broker: &InMemoryBroker,
    name: &str,
    source: &str,
    target: &str,
    errors: &str,
    settings: WorkflowConfig,
    chain: ServiceChain,
) -> Arc<TransactedWorkflow> {
    let session = broker.session(true);
    let handler = StandardMessageErrorHandler::new(Arc::new(session.producer(errors)));
    TransactedWorkflow::builder(
        name,
        Arc::new(session.consumer(source)),
        Arc::new(session.producer(target)),
    )
    .settings(settings)
    .chain(chain)
    .error_handler(Arc::new(handler))
    .build()
}

pub fn publish_labels(broker: &InMemoryBroker, queue: &str, labels: impl IntoIterator<Item = u32>) {
    for label in labels {
        broker.publish(queue, Message::from_text(&label.to_string()));
    }
}

pub fn payloads(broker: &InMemoryBroker, queue: &str) -> Vec<String> {
    broker
        .messages(queue)
        .iter()
        .map(Message::payload_text)
        .collect()
}

/// Poll `condition` every 10ms until it holds; panics after `timeout`
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + timeout;
    while !condition() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {timeout:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Run `future` with a hard upper bound so a hang fails the test instead of stalling it
pub async fn bounded<T>(timeout: Duration, future: impl Future<Output = T>) -> T {
    tokio::time::timeout(timeout, future)
        .await
        .unwrap_or_else(|_| panic!("operation did not finish within {timeout:?}"))
}
