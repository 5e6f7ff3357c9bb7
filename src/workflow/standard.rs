//! # Standard Workflow
//!
//! Non-transacted, push-style workflow: a [`Poller`] drives a
//! [`PollingConsumer`] that hands each message to this workflow's listener.
//! Successful messages are produced; failures go to the error handler when one
//! is configured and are otherwise logged and dropped.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::error_handler::MessageErrorHandler;
use super::interceptor::{MessageDisposition, WorkflowInterceptor};
use super::service::ServiceChain;
use super::Workflow;
use crate::channel::ChannelContext;
use crate::config::{PollerConfig, WorkflowConfig};
use crate::error::{ConduitError, ConduitResult};
use crate::logging::log_error;
use crate::messaging::{
    Message, MessageConsumer, MessageListener, MessageProducer, MessagingError,
};
use crate::poller::{DestinationLock, PollSchedule, Poller, PollerStats, PollingConsumer};
use crate::state_machine::{Component, ComponentStateMachine, LifecycleHooks};

struct StandardCore {
    name: String,
    settings: WorkflowConfig,
    producer: Arc<dyn MessageProducer>,
    chain: ServiceChain,
    error_handler: Option<Arc<dyn MessageErrorHandler>>,
    interceptors: Vec<Arc<dyn WorkflowInterceptor>>,
    context: RwLock<Option<ChannelContext>>,
    /// Cancelled on stop; replaced on start
    active: Mutex<CancellationToken>,
}

impl StandardCore {
    async fn handle(&self, message: Message) -> MessageDisposition {
        let mut working = message.clone();
        let result = match AssertUnwindSafe(self.chain.execute(&mut working))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(ConduitError::from_panic(&self.name, payload)),
        };

        let outcome = match result {
            Ok(()) if working.skip_production() => Ok(MessageDisposition::Skipped),
            Ok(()) => self
                .producer
                .send(&working)
                .await
                .map(|()| MessageDisposition::Produced)
                .map_err(|e| ConduitError::produce(self.producer.destination(), e.to_string())),
            Err(error) => Err(error),
        };

        match outcome {
            Ok(disposition) => disposition,
            Err(error) => self.handle_failure(&message, &error).await,
        }
    }

    async fn handle_failure(&self, message: &Message, error: &ConduitError) -> MessageDisposition {
        let Some(handler) = &self.error_handler else {
            log_error(
                &self.name,
                "process",
                &error.to_string(),
                Some(&message.unique_id),
            );
            return MessageDisposition::Failed;
        };
        match handler.handle(message, error).await {
            Ok(()) => MessageDisposition::ErrorHandled,
            Err(handler_error) => {
                warn!(
                    workflow = %self.name,
                    message_id = %message.unique_id,
                    error = %handler_error,
                    "Error handler failed; message dropped"
                );
                MessageDisposition::Failed
            }
        }
    }
}

#[async_trait]
impl MessageListener for StandardCore {
    async fn on_message(&self, message: Message) {
        for interceptor in &self.interceptors {
            interceptor.workflow_start(&self.name, &message);
        }
        let disposition = self.handle(message.clone()).await;
        for interceptor in &self.interceptors {
            interceptor.workflow_end(&self.name, &message, disposition);
        }
    }

    fn on_receive_error(&self, error: &MessagingError) {
        if !error.is_connection_fault() {
            return;
        }
        warn!(workflow = %self.name, error = %error, "Receive hit a connection fault");
        let context = self.context.read().clone();
        if let Some(context) = context {
            context.report_fault(&error.to_string());
        }
    }

    /// Blocks while the owning channel is unavailable; false once stopped
    async fn await_ready(&self) -> bool {
        let active = self.active.lock().clone();
        if active.is_cancelled() {
            return false;
        }
        let context = self.context.read().clone();
        match context {
            Some(context) => {
                context
                    .wait_until_available(self.settings.channel_unavailable_wait(), &active)
                    .await
            }
            None => true,
        }
    }
}

/// Push-style workflow fed by a poller
pub struct StandardWorkflow {
    lifecycle: ComponentStateMachine,
    core: Arc<StandardCore>,
    consumer: Arc<dyn MessageConsumer>,
    poller_config: PollerConfig,
    poller: Poller,
}

impl std::fmt::Debug for StandardWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StandardWorkflow")
            .field("name", &self.core.name)
            .field("state", &self.lifecycle.state())
            .field("source", &self.consumer.destination())
            .field("destination", &self.core.producer.destination())
            .field("poller", &self.poller)
            .finish()
    }
}

/// Builder for [`StandardWorkflow`]
pub struct StandardWorkflowBuilder {
    name: String,
    consumer: Arc<dyn MessageConsumer>,
    producer: Arc<dyn MessageProducer>,
    settings: WorkflowConfig,
    poller: PollerConfig,
    lock: Option<Arc<dyn DestinationLock>>,
    chain: ServiceChain,
    error_handler: Option<Arc<dyn MessageErrorHandler>>,
    interceptors: Vec<Arc<dyn WorkflowInterceptor>>,
}

impl StandardWorkflowBuilder {
    pub fn settings(mut self, settings: WorkflowConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }

    pub fn lock(mut self, lock: Arc<dyn DestinationLock>) -> Self {
        self.lock = Some(lock);
        self
    }

    pub fn chain(mut self, chain: ServiceChain) -> Self {
        self.chain = chain;
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn MessageErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn interceptor(mut self, interceptor: Arc<dyn WorkflowInterceptor>) -> Self {
        self.interceptors.push(interceptor);
        self
    }

    pub fn build(self) -> Arc<StandardWorkflow> {
        let core = Arc::new(StandardCore {
            name: self.name.clone(),
            settings: self.settings,
            producer: self.producer,
            chain: self.chain,
            error_handler: self.error_handler,
            interceptors: self.interceptors,
            context: RwLock::new(None),
            active: Mutex::new(CancellationToken::new()),
        });

        let listener: Arc<dyn MessageListener> = core.clone();
        let mut polling = PollingConsumer::new(Arc::clone(&self.consumer), listener, &self.poller);
        if let Some(lock) = self.lock {
            polling = polling.with_lock(lock);
        }
        let poller = Poller::new(
            format!("{}-poller", self.name),
            PollSchedule::from_config(&self.poller),
            Arc::new(polling),
        );

        Arc::new(StandardWorkflow {
            lifecycle: ComponentStateMachine::new(self.name),
            core,
            consumer: self.consumer,
            poller_config: self.poller,
            poller,
        })
    }
}

impl StandardWorkflow {
    pub fn builder(
        name: impl Into<String>,
        consumer: Arc<dyn MessageConsumer>,
        producer: Arc<dyn MessageProducer>,
    ) -> StandardWorkflowBuilder {
        StandardWorkflowBuilder {
            name: name.into(),
            consumer,
            producer,
            settings: WorkflowConfig::default(),
            poller: PollerConfig::default(),
            lock: None,
            chain: ServiceChain::new(),
            error_handler: None,
            interceptors: Vec::new(),
        }
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn poller_stats(&self) -> PollerStats {
        self.poller.stats()
    }
}

impl Workflow for StandardWorkflow {
    fn attach(&self, context: ChannelContext) {
        *self.core.context.write() = Some(context);
    }
}

#[async_trait]
impl LifecycleHooks for StandardWorkflow {
    fn state_machine(&self) -> &ComponentStateMachine {
        &self.lifecycle
    }

    async fn do_init(&self) -> ConduitResult<()> {
        self.core.settings.validate()?;
        self.poller_config.validate()?;
        self.consumer.init().await?;
        self.core.producer.init().await?;
        if let Some(handler) = &self.core.error_handler {
            handler.init().await?;
        }
        self.poller.request_init().await
    }

    async fn do_start(&self) -> ConduitResult<()> {
        *self.core.active.lock() = CancellationToken::new();
        self.poller.request_start().await?;
        info!(
            workflow = %self.core.name,
            source = %self.consumer.destination(),
            "Standard workflow started"
        );
        Ok(())
    }

    async fn do_stop(&self) -> ConduitResult<()> {
        self.core.active.lock().cancel();
        self.poller.request_stop().await
    }

    async fn do_close(&self) -> ConduitResult<()> {
        self.poller.request_close().await?;
        if let Some(handler) = &self.core.error_handler {
            handler.close().await;
        }
        self.core.producer.close().await;
        self.consumer.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::messaging::InMemoryBroker;
    use crate::state_machine::ComponentState;
    use crate::workflow::{MessageMetricsInterceptor, Service, StandardMessageErrorHandler};
    use std::time::Duration;

    struct RejectOdd;

    #[async_trait]
    impl Service for RejectOdd {
        fn name(&self) -> &str {
            "reject-odd"
        }

        async fn process(&self, message: &mut Message) -> ConduitResult<()> {
            let value: u32 = message.payload_text().parse().unwrap_or(0);
            if value % 2 == 1 {
                Err(ConduitError::processing("reject-odd", "odd value"))
            } else {
                Ok(())
            }
        }
    }

    fn fast_poller() -> PollerConfig {
        PollerConfig {
            interval_ms: 5,
            random_max_interval_ms: None,
            max_messages_per_poll: 10,
            reacquire_lock_between_messages: false,
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition never became true");
    }

    #[tokio::test]
    async fn test_routes_success_and_failures() {
        let broker = InMemoryBroker::new("b");
        for i in 0..4 {
            broker.publish("in", Message::from_text(&i.to_string()));
        }
        let metrics = Arc::new(MessageMetricsInterceptor::new());
        let handler = StandardMessageErrorHandler::new(Arc::new(broker.producer("errors")));
        let wf = StandardWorkflow::builder(
            "std",
            Arc::new(broker.consumer("in")),
            Arc::new(broker.producer("out")),
        )
        .poller(fast_poller())
        .chain(ServiceChain::new().with(Arc::new(RejectOdd)))
        .error_handler(Arc::new(handler))
        .interceptor(metrics.clone())
        .build();

        wf.request_start().await.unwrap();
        wait_until(|| metrics.snapshot().completed() == 4).await;
        wf.request_close().await.unwrap();

        let out: Vec<String> = broker.messages("out").iter().map(Message::payload_text).collect();
        let errors: Vec<String> = broker
            .messages("errors")
            .iter()
            .map(Message::payload_text)
            .collect();
        assert_eq!(out, vec!["0", "2"]);
        assert_eq!(errors, vec!["1", "3"]);
        assert_eq!(metrics.snapshot().error_handled, 2);
        assert_eq!(wf.state(), ComponentState::Closed);
    }

    #[tokio::test]
    async fn test_failure_without_handler_is_dropped() {
        let broker = InMemoryBroker::new("b");
        broker.publish("in", Message::from_text("1"));
        let metrics = Arc::new(MessageMetricsInterceptor::new());
        let wf = StandardWorkflow::builder(
            "std",
            Arc::new(broker.consumer("in")),
            Arc::new(broker.producer("out")),
        )
        .poller(fast_poller())
        .chain(ServiceChain::new().with(Arc::new(RejectOdd)))
        .interceptor(metrics.clone())
        .build();

        wf.request_start().await.unwrap();
        wait_until(|| metrics.snapshot().failed == 1).await;
        wf.request_close().await.unwrap();

        assert_eq!(broker.queue_length("in"), 0);
        assert_eq!(broker.queue_length("out"), 0);
    }

    #[tokio::test]
    async fn test_init_fails_when_broker_down() {
        let broker = InMemoryBroker::new("b");
        broker.set_available(false);
        let wf = StandardWorkflow::builder(
            "std",
            Arc::new(broker.consumer("in")),
            Arc::new(broker.producer("out")),
        )
        .build();

        let err = wf.request_start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lifecycle);
        assert_eq!(wf.state(), ComponentState::Closed);
        assert_eq!(wf.poller().state(), ComponentState::Closed);
    }

    #[tokio::test]
    async fn test_zero_poll_interval_fails_fast() {
        let broker = InMemoryBroker::new("b");
        broker.publish("in", Message::from_text("0"));
        let wf = StandardWorkflow::builder(
            "std",
            Arc::new(broker.consumer("in")),
            Arc::new(broker.producer("out")),
        )
        .poller(PollerConfig {
            interval_ms: 0,
            ..fast_poller()
        })
        .build();

        let err = wf.request_start().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert_eq!(wf.state(), ComponentState::Closed);
        assert_eq!(wf.poller_stats().cycles, 0);
        assert_eq!(broker.queue_length("in"), 1);
    }

    #[derive(Debug, Default)]
    struct SteadyLink;

    #[async_trait]
    impl crate::connection::BrokerLink for SteadyLink {
        fn describe(&self) -> String {
            "steady://".to_string()
        }

        async fn connect(&self) -> crate::messaging::MessagingResult<()> {
            Ok(())
        }

        async fn disconnect(&self) {}

        async fn check(&self) -> crate::messaging::MessagingResult<()> {
            Ok(())
        }
    }

    struct LostConsumer;

    #[async_trait]
    impl MessageConsumer for LostConsumer {
        fn destination(&self) -> &str {
            "lost"
        }

        async fn receive(
            &self,
            _timeout: Duration,
        ) -> crate::messaging::MessagingResult<Option<Message>> {
            Err(MessagingError::connection_lost("lost", "socket reset"))
        }
    }

    #[tokio::test]
    async fn test_receive_fault_is_reported_to_connection() {
        use crate::config::ConnectionConfig;
        use crate::connection::Connection;

        let connection = Connection::new(
            "conn",
            ConnectionConfig::default(),
            Arc::new(SteadyLink),
        );
        connection.request_start().await.unwrap();
        let (_gate, availability) = tokio::sync::watch::channel(true);

        let broker = InMemoryBroker::new("b");
        let wf = StandardWorkflow::builder(
            "std",
            Arc::new(LostConsumer),
            Arc::new(broker.producer("out")),
        )
        .poller(fast_poller())
        .build();
        wf.attach(ChannelContext::new(
            "ch".to_string(),
            availability,
            Arc::clone(&connection),
        ));

        wf.request_start().await.unwrap();
        wait_until(|| connection.recovery_stats().cycles_started >= 1).await;
        wf.request_close().await.unwrap();
        assert!(wf.poller_stats().failed_cycles >= 1);
        connection.request_close().await.unwrap();
    }
}
