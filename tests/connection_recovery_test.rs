//! Connection outage and recovery scenarios against the in-memory broker

mod common;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use conduit_core::config::{ConnectionConfig, ConnectionErrorHandlerConfig};
use conduit_core::error::ConduitResult;
use conduit_core::messaging::{InMemoryBroker, Message};
use conduit_core::runtime::ConduitRuntime;
use conduit_core::state_machine::{Component, ComponentState};
use conduit_core::workflow::{Service, ServiceChain};
use tokio::sync::Notify;

const PATIENCE: Duration = Duration::from_secs(10);

fn orders_runtime(broker: &InMemoryBroker, connection: ConnectionConfig) -> ConduitRuntime {
    let workflow = transacted(
        broker,
        "orders-in",
        "orders.in",
        "orders.out",
        fast_workflow(true),
        ServiceChain::new(),
    );
    ConduitRuntime::builder(runtime_config(connection, &[("orders", true)]))
        .link("broker", Arc::new(broker.link()))
        .workflow("orders", workflow)
        .build()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_channel_restarts_once_per_outage() {
    init_test_logging();
    let broker = InMemoryBroker::new("outage");
    let runtime = orders_runtime(&broker, fast_connection(None));
    runtime.start().await.unwrap();
    let channel = runtime.channel("orders").unwrap();
    let connection = runtime.connection("broker").unwrap();
    assert_eq!(channel.counts().start_count, 1);

    for outage in 1..=2u64 {
        broker.set_available(false);
        tokio::time::sleep(Duration::from_millis(300)).await;
        broker.set_available(true);

        wait_until(PATIENCE, || {
            channel.state() == ComponentState::Started
                && channel.counts().start_count == outage + 1
        })
        .await;
        assert_eq!(connection.recovery_stats().recovered, outage);
    }

    publish_labels(&broker, "orders.in", 0..3);
    wait_until(PATIENCE, || broker.queue_length("orders.out") == 3).await;
    assert_eq!(payloads(&broker, "orders.out"), vec!["0", "1", "2"]);

    bounded(PATIENCE, runtime.shutdown()).await.unwrap();
    assert_eq!(channel.counts().start_count, 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_one_second_outage_with_periodic_check() {
    init_test_logging();
    let broker = InMemoryBroker::new("periodic");
    let connection_config = ConnectionConfig {
        retry_interval_ms: 100,
        max_attempts: Some(50),
        error_handler: ConnectionErrorHandlerConfig {
            check_interval_ms: Some(100),
            single_execution: true,
        },
    };
    let runtime = orders_runtime(&broker, connection_config);
    runtime.start().await.unwrap();
    let channel = runtime.channel("orders").unwrap();

    broker.set_available(false);
    tokio::time::sleep(Duration::from_secs(1)).await;
    broker.set_available(true);

    wait_until(PATIENCE, || {
        channel.state() == ComponentState::Started && channel.counts().start_count == 2
    })
    .await;

    let connection = runtime.connection("broker").unwrap();
    let stats = connection.recovery_stats();
    assert_eq!(stats.recovered, 1);
    assert_eq!(stats.exhausted, 0);
    assert!(stats.last_recovered_at.is_some());
    assert_eq!(connection.state(), ComponentState::Started);

    // a second cycle must not follow the completed one
    tokio::time::sleep(Duration::from_millis(400)).await;
    assert_eq!(channel.counts().start_count, 2);

    bounded(PATIENCE, runtime.shutdown()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_channels_sharing_a_connection_recover_together() {
    init_test_logging();
    let broker = InMemoryBroker::new("shared");
    let orders = transacted(
        &broker,
        "orders-in",
        "orders.in",
        "orders.out",
        fast_workflow(true),
        ServiceChain::new(),
    );
    let audit = transacted(
        &broker,
        "audit-in",
        "audit.in",
        "audit.out",
        fast_workflow(true),
        ServiceChain::new(),
    );
    let runtime = ConduitRuntime::builder(runtime_config(
        fast_connection(None),
        &[("orders", true), ("audit", true)],
    ))
    .link("broker", Arc::new(broker.link()))
    .workflow("orders", orders)
    .workflow("audit", audit)
    .build()
    .unwrap();
    runtime.start().await.unwrap();

    broker.set_available(false);
    tokio::time::sleep(Duration::from_millis(250)).await;
    broker.set_available(true);

    let channels = [
        runtime.channel("orders").unwrap(),
        runtime.channel("audit").unwrap(),
    ];
    wait_until(PATIENCE, || {
        channels
            .iter()
            .all(|c| c.state() == ComponentState::Started && c.counts().start_count == 2)
    })
    .await;

    let stats = runtime.connection("broker").unwrap().recovery_stats();
    assert_eq!(stats.recovered, 1);
    assert_eq!(stats.cycles_started, 1);

    publish_labels(&broker, "audit.in", [7]);
    wait_until(PATIENCE, || broker.queue_length("audit.out") == 1).await;
    bounded(PATIENCE, runtime.shutdown()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_channel_without_auto_start_is_left_alone() {
    init_test_logging();
    let broker = InMemoryBroker::new("manual");
    let runtime = ConduitRuntime::builder(runtime_config(
        fast_connection(None),
        &[("orders", true), ("manual", false)],
    ))
    .link("broker", Arc::new(broker.link()))
    .build()
    .unwrap();
    runtime.start().await.unwrap();
    let orders = runtime.channel("orders").unwrap();
    let manual = runtime.channel("manual").unwrap();
    assert_eq!(manual.counts().init_count, 0);

    broker.set_available(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    broker.set_available(true);
    wait_until(PATIENCE, || orders.counts().start_count == 2).await;

    assert_eq!(manual.state(), ComponentState::Closed);
    assert_eq!(manual.counts().init_count, 0);
    bounded(PATIENCE, runtime.shutdown()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_manually_started_channel_is_closed_but_not_restarted() {
    init_test_logging();
    let broker = InMemoryBroker::new("manual-started");
    let runtime =
        ConduitRuntime::builder(runtime_config(fast_connection(None), &[("manual", false)]))
            .link("broker", Arc::new(broker.link()))
            .build()
            .unwrap();
    runtime.start_channel("manual").await.unwrap();
    let manual = runtime.channel("manual").unwrap();
    assert_eq!(manual.state(), ComponentState::Started);

    broker.set_available(false);
    tokio::time::sleep(Duration::from_millis(200)).await;
    broker.set_available(true);

    let connection = runtime.connection("broker").unwrap();
    wait_until(PATIENCE, || connection.recovery_stats().recovered == 1).await;
    assert_eq!(manual.state(), ComponentState::Closed);
    assert_eq!(manual.counts().close_count, 1);
    assert_eq!(manual.counts().start_count, 1);

    runtime.start_channel("manual").await.unwrap();
    assert_eq!(manual.state(), ComponentState::Started);
    bounded(PATIENCE, runtime.shutdown()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exhausted_recovery_leaves_channels_closed() {
    init_test_logging();
    let broker = InMemoryBroker::new("exhausted");
    let runtime = orders_runtime(&broker, fast_connection(Some(3)));
    runtime.start().await.unwrap();
    let channel = runtime.channel("orders").unwrap();
    let connection = runtime.connection("broker").unwrap();

    broker.set_available(false);
    wait_until(PATIENCE, || connection.recovery_stats().exhausted == 1).await;
    wait_until(PATIENCE, || connection.state() == ComponentState::Closed).await;
    assert_eq!(channel.state(), ComponentState::Closed);

    // nothing restarts the channel once the broker is back
    broker.set_available(true);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(channel.state(), ComponentState::Closed);
    assert_eq!(channel.counts().start_count, 1);

    runtime.start_channel("orders").await.unwrap();
    assert_eq!(channel.state(), ComponentState::Started);
    assert_eq!(connection.state(), ComponentState::Started);
    assert_eq!(connection.counts().init_count, 2, "reconnected on restart");

    publish_labels(&broker, "orders.in", 0..3);
    wait_until(PATIENCE, || broker.queue_length("orders.out") == 3).await;

    // a later outage is recovered from again
    broker.set_available(false);
    wait_until(PATIENCE, || channel.state() == ComponentState::Closed).await;
    broker.set_available(true);
    wait_until(PATIENCE, || {
        channel.state() == ComponentState::Started && connection.recovery_stats().recovered == 1
    })
    .await;
    bounded(PATIENCE, runtime.shutdown()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_interrupts_reconnect_loop() {
    init_test_logging();
    let broker = InMemoryBroker::new("endless");
    let runtime = orders_runtime(&broker, fast_connection(None));
    runtime.start().await.unwrap();
    let connection = runtime.connection("broker").unwrap();

    broker.set_available(false);
    wait_until(PATIENCE, || connection.is_recovering()).await;

    bounded(Duration::from_secs(2), runtime.shutdown()).await.unwrap();
    wait_until(PATIENCE, || !connection.is_recovering()).await;
    assert_eq!(connection.state(), ComponentState::Closed);
    assert_eq!(connection.recovery_stats().cancelled, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_in_flight_message_survives_outage() {
    init_test_logging();
    let broker = InMemoryBroker::new("in-flight");
    let recorder = Recorder::new();
    let gate = Arc::new(Notify::new());
    let workflow = transacted(
        &broker,
        "orders-in",
        "orders.in",
        "orders.out",
        fast_workflow(true),
        ServiceChain::new()
            .with(Arc::new(BlockOnce::new(Arc::clone(&gate))))
            .with(recorder.clone()),
    );
    let runtime =
        ConduitRuntime::builder(runtime_config(fast_connection(None), &[("orders", true)]))
            .link("broker", Arc::new(broker.link()))
            .workflow("orders", workflow)
            .build()
            .unwrap();
    publish_labels(&broker, "orders.in", [42]);
    runtime.start().await.unwrap();

    // the first delivery is stuck in the chain while the broker goes away
    tokio::time::sleep(Duration::from_millis(100)).await;
    broker.set_available(false);
    gate.notify_one();
    tokio::time::sleep(Duration::from_millis(200)).await;
    broker.set_available(true);

    wait_until(PATIENCE, || broker.queue_length("orders.out") == 1).await;
    assert_eq!(payloads(&broker, "orders.out"), vec!["42"]);
    assert_eq!(broker.queue_length("orders.in"), 0);
    bounded(PATIENCE, runtime.shutdown()).await.unwrap();
}

/// Parks the first message until notified; later messages pass straight through
struct BlockOnce {
    gate: Arc<Notify>,
    used: AtomicBool,
}

impl BlockOnce {
    fn new(gate: Arc<Notify>) -> Self {
        Self {
            gate,
            used: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Service for BlockOnce {
    fn name(&self) -> &str {
        "block-once"
    }

    async fn process(&self, _message: &mut Message) -> ConduitResult<()> {
        if !self.used.swap(true, Ordering::SeqCst) {
            self.gate.notified().await;
        }
        Ok(())
    }
}
