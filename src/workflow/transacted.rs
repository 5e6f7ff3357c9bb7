//! # Transacted Workflow
//!
//! Receives one message at a time inside the consumer's transaction, runs the
//! service chain, and commits or rolls back according to
//! [`TransactionDecision::decide`]. Processing is sequential on a single task
//! per workflow, so a rolled back message is redelivered before anything queued
//! behind it.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::decision::{ChainOutcome, TransactionDecision};
use super::error_handler::MessageErrorHandler;
use super::interceptor::{MessageDisposition, WorkflowInterceptor};
use super::service::ServiceChain;
use super::Workflow;
use crate::channel::ChannelContext;
use crate::config::WorkflowConfig;
use crate::error::{ConduitError, ConduitResult};
use crate::logging::{log_error, log_transaction_decision};
use crate::messaging::{Message, MessageProducer, MessagingError, TransactionalConsumer};
use crate::state_machine::{ComponentStateMachine, LifecycleHooks};

/// Shared state between the workflow handle and its processing task
struct TransactedCore {
    name: String,
    settings: WorkflowConfig,
    consumer: Arc<dyn TransactionalConsumer>,
    producer: Arc<dyn MessageProducer>,
    chain: ServiceChain,
    error_handler: Option<Arc<dyn MessageErrorHandler>>,
    interceptors: Vec<Arc<dyn WorkflowInterceptor>>,
    context: RwLock<Option<ChannelContext>>,
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Consume-process-produce workflow wrapped in broker transactions
pub struct TransactedWorkflow {
    lifecycle: ComponentStateMachine,
    core: Arc<TransactedCore>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for TransactedWorkflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactedWorkflow")
            .field("name", &self.core.name)
            .field("state", &self.lifecycle.state())
            .field("source", &self.core.consumer.destination())
            .field("destination", &self.core.producer.destination())
            .field("strict", &self.core.settings.strict)
            .field("chain", &self.core.chain)
            .field("has_error_handler", &self.core.error_handler.is_some())
            .finish()
    }
}

/// Builder for [`TransactedWorkflow`]
pub struct TransactedWorkflowBuilder {
    name: String,
    settings: WorkflowConfig,
    consumer: Arc<dyn TransactionalConsumer>,
    producer: Arc<dyn MessageProducer>,
    chain: ServiceChain,
    error_handler: Option<Arc<dyn MessageErrorHandler>>,
    interceptors: Vec<Arc<dyn WorkflowInterceptor>>,
}

impl TransactedWorkflowBuilder {
    pub fn settings(mut self, settings: WorkflowConfig) -> Self {
        self.settings = settings;
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.settings.strict = strict;
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

    pub fn build(self) -> Arc<TransactedWorkflow> {
        Arc::new(TransactedWorkflow {
            lifecycle: ComponentStateMachine::new(self.name.clone()),
            core: Arc::new(TransactedCore {
                name: self.name,
                settings: self.settings,
                consumer: self.consumer,
                producer: self.producer,
                chain: self.chain,
                error_handler: self.error_handler,
                interceptors: self.interceptors,
                context: RwLock::new(None),
            }),
            worker: Mutex::new(None),
        })
    }
}

impl TransactedWorkflow {
    pub fn builder(
        name: impl Into<String>,
        consumer: Arc<dyn TransactionalConsumer>,
        producer: Arc<dyn MessageProducer>,
    ) -> TransactedWorkflowBuilder {
        TransactedWorkflowBuilder {
            name: name.into(),
            settings: WorkflowConfig::default(),
            consumer,
            producer,
            chain: ServiceChain::new(),
            error_handler: None,
            interceptors: Vec::new(),
        }
    }

    pub fn settings(&self) -> &WorkflowConfig {
        &self.core.settings
    }

    pub fn is_strict(&self) -> bool {
        self.core.settings.strict
    }
}

impl Workflow for TransactedWorkflow {
    fn attach(&self, context: ChannelContext) {
        *self.core.context.write() = Some(context);
    }
}

#[async_trait]
impl LifecycleHooks for TransactedWorkflow {
    fn state_machine(&self) -> &ComponentStateMachine {
        &self.lifecycle
    }

    async fn do_init(&self) -> ConduitResult<()> {
        self.core.settings.validate()?;
        self.core.consumer.init().await?;
        self.core.producer.init().await?;
        if let Some(handler) = &self.core.error_handler {
            handler.init().await?;
        }
        Ok(())
    }

    async fn do_start(&self) -> ConduitResult<()> {
        let cancel = CancellationToken::new();
        let core = Arc::clone(&self.core);
        let task_cancel = cancel.clone();
        let handle = tokio::spawn(async move { core.run(task_cancel).await });
        *self.worker.lock() = Some(Worker { cancel, handle });
        info!(
            workflow = %self.core.name,
            source = %self.core.consumer.destination(),
            strict = self.core.settings.strict,
            "Transacted workflow started"
        );
        Ok(())
    }

    async fn do_stop(&self) -> ConduitResult<()> {
        let worker = self.worker.lock().take();
        if let Some(Worker { cancel, handle }) = worker {
            cancel.cancel();
            if let Err(join_error) = handle.await {
                error!(
                    workflow = %self.core.name,
                    error = %join_error,
                    "Processing task ended abnormally"
                );
            }
        }
        Ok(())
    }

    async fn do_close(&self) -> ConduitResult<()> {
        if let Some(handler) = &self.core.error_handler {
            handler.close().await;
        }
        self.core.producer.close().await;
        self.core.consumer.close().await;
        Ok(())
    }
}

impl TransactedCore {
    fn context(&self) -> Option<ChannelContext> {
        self.context.read().clone()
    }

    async fn run(&self, cancel: CancellationToken) {
        debug!(workflow = %self.name, "Processing loop entered");
        while !cancel.is_cancelled() {
            if let Some(context) = self.context() {
                if !context
                    .wait_until_available(self.settings.channel_unavailable_wait(), &cancel)
                    .await
                {
                    break;
                }
            }

            let received = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                received = self.consumer.receive(self.settings.receive_timeout()) => received,
            };

            let pause = match received {
                Ok(None) => false,
                Ok(Some(message)) => self.process(message).await == MessageDisposition::RolledBack,
                Err(error) => {
                    self.on_receive_error(&error);
                    true
                }
            };

            if pause && !self.rollback_wait(&cancel).await {
                break;
            }
        }
        debug!(workflow = %self.name, "Processing loop exited");
    }

    fn on_receive_error(&self, error: &MessagingError) {
        if error.is_connection_fault() {
            warn!(workflow = %self.name, error = %error, "Receive hit a connection fault");
            if let Some(context) = self.context() {
                context.report_fault(&error.to_string());
            }
        } else {
            log_error(&self.name, "receive", &error.to_string(), None);
        }
    }

    /// Interruptible pause after a rollback; false when cancelled
    async fn rollback_wait(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.settings.rollback_wait()) => true,
        }
    }

    /// Handle one received message to commit or rollback
    async fn process(&self, message: Message) -> MessageDisposition {
        for interceptor in &self.interceptors {
            interceptor.workflow_start(&self.name, &message);
        }

        let mut working = message.clone();
        let result = match AssertUnwindSafe(self.chain.execute(&mut working))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(payload) => Err(ConduitError::from_panic(&self.name, payload)),
        };

        let decision = TransactionDecision::decide(
            ChainOutcome::from_result(&result),
            self.settings.strict,
            self.error_handler.is_some(),
        );
        log_transaction_decision(
            &self.name,
            &message.unique_id,
            decision.as_str(),
            result.as_ref().err().map(|e| e.kind().to_string()).as_deref(),
        );

        let disposition = match (decision, result) {
            (TransactionDecision::CommitToMain, _) => self.commit_to_main(&working).await,
            (TransactionDecision::CommitToErrorHandler, Err(error)) => {
                self.commit_to_error_handler(&message, &error).await
            }
            (_, Err(error)) => {
                warn!(
                    workflow = %self.name,
                    message_id = %message.unique_id,
                    kind = %error.kind(),
                    error = %error,
                    "Message processing failed; rolling back"
                );
                self.rollback().await
            }
            (_, Ok(())) => self.rollback().await,
        };

        for interceptor in &self.interceptors {
            interceptor.workflow_end(&self.name, &working, disposition);
        }
        disposition
    }

    async fn commit_to_main(&self, message: &Message) -> MessageDisposition {
        let disposition = if message.skip_production() {
            MessageDisposition::Skipped
        } else {
            if let Err(error) = self.producer.send(message).await {
                let error = ConduitError::produce(self.producer.destination(), error.to_string());
                warn!(
                    workflow = %self.name,
                    message_id = %message.unique_id,
                    error = %error,
                    "Produce failed; rolling back"
                );
                return self.rollback().await;
            }
            MessageDisposition::Produced
        };
        self.commit(message, disposition).await
    }

    async fn commit_to_error_handler(
        &self,
        message: &Message,
        error: &ConduitError,
    ) -> MessageDisposition {
        let Some(handler) = &self.error_handler else {
            return self.rollback().await;
        };
        match handler.handle(message, error).await {
            Ok(()) => self.commit(message, MessageDisposition::ErrorHandled).await,
            Err(handler_error) => {
                warn!(
                    workflow = %self.name,
                    message_id = %message.unique_id,
                    error = %handler_error,
                    "Error handler failed; rolling back"
                );
                self.rollback().await
            }
        }
    }

    async fn commit(
        &self,
        message: &Message,
        disposition: MessageDisposition,
    ) -> MessageDisposition {
        match self.consumer.commit().await {
            Ok(()) => disposition,
            Err(error) => {
                warn!(
                    workflow = %self.name,
                    message_id = %message.unique_id,
                    error = %error,
                    "Commit failed"
                );
                if error.is_connection_fault() {
                    if let Some(context) = self.context() {
                        context.report_fault(&error.to_string());
                    }
                }
                self.rollback().await
            }
        }
    }

    async fn rollback(&self) -> MessageDisposition {
        if let Err(error) = self.consumer.rollback().await {
            // broker discards the transaction of a dead session on its own
            debug!(workflow = %self.name, error = %error, "Rollback failed");
        }
        MessageDisposition::RolledBack
    }
}
