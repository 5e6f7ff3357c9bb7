//! # In-Memory Broker
//!
//! Thread-safe in-memory broker for development and testing.
//!
//! ## Features
//!
//! - **Transacted Sessions**: received messages stay in flight until commit; rollback
//!   returns them to the head of their queue in original order
//! - **Outage Simulation**: `set_available(false)` fails every operation with
//!   `ConnectionLost`, invalidates open sessions and notifies failure listeners
//! - **Blocking Receive**: receivers park on a `Notify` instead of spinning

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{BrokerLink, ConnectionFailureListener};
use crate::messaging::traits::{MessageConsumer, MessageProducer, TransactionalConsumer};
use crate::messaging::{Message, MessagingError, MessagingResult};

struct BrokerState {
    name: String,
    queues: Mutex<HashMap<String, VecDeque<Message>>>,
    available: AtomicBool,
    /// Bumped on every outage; sessions opened in an older epoch are dead
    epoch: AtomicU64,
    notify: Notify,
    connect_attempts: AtomicU64,
    failure_listeners: Mutex<Vec<Weak<dyn ConnectionFailureListener>>>,
}

/// In-memory broker shared by links, sessions, consumers and producers
///
/// # Example
///
/// ```rust
/// use conduit_core::messaging::{InMemoryBroker, Message, MessageConsumer};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let broker = InMemoryBroker::new("local");
/// broker.publish("orders", Message::from_text("hello"));
///
/// let consumer = broker.consumer("orders");
/// consumer.init().await?;
/// let received = consumer.receive(Duration::from_millis(10)).await?;
/// assert_eq!(received.map(|m| m.payload_text()), Some("hello".to_string()));
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryBroker {
    state: Arc<BrokerState>,
}

impl std::fmt::Debug for InMemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryBroker")
            .field("name", &self.state.name)
            .field("available", &self.is_available())
            .field("epoch", &self.epoch())
            .finish()
    }
}

impl InMemoryBroker {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            state: Arc::new(BrokerState {
                name: name.into(),
                queues: Mutex::new(HashMap::new()),
                available: AtomicBool::new(true),
                epoch: AtomicU64::new(1),
                notify: Notify::new(),
                connect_attempts: AtomicU64::new(0),
                failure_listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    /// Simulate an outage (`false`) or its end (`true`)
    pub fn set_available(&self, available: bool) {
        let was_available = self.state.available.swap(available, Ordering::SeqCst);
        if was_available && !available {
            let epoch = self.state.epoch.fetch_add(1, Ordering::SeqCst) + 1;
            warn!(broker = %self.state.name, epoch = epoch, "In-memory broker became unavailable");
            self.notify_failure_listeners("broker unavailable");
        } else if !was_available && available {
            info!(broker = %self.state.name, "In-memory broker available again");
        }
        self.state.notify.notify_waiters();
    }

    pub fn is_available(&self) -> bool {
        self.state.available.load(Ordering::SeqCst)
    }

    pub(crate) fn epoch(&self) -> u64 {
        self.state.epoch.load(Ordering::SeqCst)
    }

    /// Number of `connect` calls seen by links of this broker
    pub fn connect_attempts(&self) -> u64 {
        self.state.connect_attempts.load(Ordering::SeqCst)
    }

    /// Enqueue a message out of band (ignores availability)
    pub fn publish(&self, queue: &str, message: Message) {
        self.state
            .queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
        self.state.notify.notify_waiters();
    }

    pub fn queue_length(&self, queue: &str) -> usize {
        self.state
            .queues
            .lock()
            .get(queue)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Snapshot of a queue's contents without consuming them
    pub fn messages(&self, queue: &str) -> Vec<Message> {
        self.state
            .queues
            .lock()
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return every message in a queue
    pub fn drain(&self, queue: &str) -> Vec<Message> {
        self.state
            .queues
            .lock()
            .get_mut(queue)
            .map(|q| q.drain(..).collect())
            .unwrap_or_default()
    }

    pub fn link(&self) -> InMemoryBrokerLink {
        InMemoryBrokerLink {
            broker: self.clone(),
        }
    }

    /// Open a new session; transacted sessions hold receives and sends until commit
    pub fn session(&self, transacted: bool) -> Arc<InMemorySession> {
        Arc::new(InMemorySession {
            broker: self.clone(),
            transacted,
            bound_epoch: AtomicU64::new(0),
            in_flight: Mutex::new(Vec::new()),
            pending_sends: Mutex::new(Vec::new()),
        })
    }

    /// Auto-acknowledging consumer on its own session
    pub fn consumer(&self, destination: &str) -> InMemoryConsumer {
        self.session(false).consumer(destination)
    }

    /// Direct producer on its own session
    pub fn producer(&self, destination: &str) -> InMemoryProducer {
        self.session(false).producer(destination)
    }

    fn enqueue(&self, queue: &str, message: Message) {
        self.state
            .queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_back(message);
    }

    fn pop(&self, queue: &str) -> Option<Message> {
        let mut queues = self.state.queues.lock();
        queues.get_mut(queue).and_then(VecDeque::pop_front).map(|mut m| {
            m.delivery_count += 1;
            m
        })
    }

    /// Put messages back at the head of their queues, preserving their order
    fn requeue_front(&self, messages: Vec<(String, Message)>) {
        if messages.is_empty() {
            return;
        }
        let mut queues = self.state.queues.lock();
        for (queue, message) in messages.into_iter().rev() {
            queues.entry(queue).or_default().push_front(message);
        }
        drop(queues);
        self.state.notify.notify_waiters();
    }

    fn register_failure_listener(&self, listener: Weak<dyn ConnectionFailureListener>) {
        let mut listeners = self.state.failure_listeners.lock();
        listeners.retain(|l| l.strong_count() > 0);
        listeners.push(listener);
    }

    fn notify_failure_listeners(&self, reason: &str) {
        let listeners: Vec<_> = self
            .state
            .failure_listeners
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for listener in listeners {
            listener.on_connection_failure(reason);
        }
    }

    fn connection_lost(&self) -> MessagingError {
        MessagingError::connection_lost(self.state.name.clone(), "broker unavailable")
    }
}

/// A broker session shared by the consumers and producers created from it
pub struct InMemorySession {
    broker: InMemoryBroker,
    transacted: bool,
    /// Epoch the session was opened in; 0 when closed
    bound_epoch: AtomicU64,
    in_flight: Mutex<Vec<(String, Message)>>,
    pending_sends: Mutex<Vec<(String, Message)>>,
}

impl std::fmt::Debug for InMemorySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySession")
            .field("broker", &self.broker.name())
            .field("transacted", &self.transacted)
            .field("bound_epoch", &self.bound_epoch.load(Ordering::SeqCst))
            .finish()
    }
}

impl InMemorySession {
    pub fn consumer(self: &Arc<Self>, destination: &str) -> InMemoryConsumer {
        InMemoryConsumer {
            session: Arc::clone(self),
            destination: destination.to_string(),
        }
    }

    pub fn producer(self: &Arc<Self>, destination: &str) -> InMemoryProducer {
        InMemoryProducer {
            session: Arc::clone(self),
            destination: destination.to_string(),
        }
    }

    pub fn is_transacted(&self) -> bool {
        self.transacted
    }

    fn open(&self) -> MessagingResult<()> {
        if !self.broker.is_available() {
            return Err(self.broker.connection_lost());
        }
        let current = self.broker.epoch();
        let previous = self.bound_epoch.swap(current, Ordering::SeqCst);
        if previous != current {
            self.abandon_transaction();
            debug!(broker = %self.broker.name(), epoch = current, "Session opened");
        }
        Ok(())
    }

    /// Fails when the broker is down or the session predates the last outage.
    /// A dead session's transaction is rolled back broker-side.
    fn ensure_open(&self) -> MessagingResult<()> {
        let bound = self.bound_epoch.load(Ordering::SeqCst);
        if self.broker.is_available() && bound == self.broker.epoch() {
            return Ok(());
        }
        self.abandon_transaction();
        Err(self.broker.connection_lost())
    }

    fn close(&self) {
        self.abandon_transaction();
        self.bound_epoch.store(0, Ordering::SeqCst);
    }

    fn abandon_transaction(&self) {
        let in_flight: Vec<_> = self.in_flight.lock().drain(..).collect();
        self.pending_sends.lock().clear();
        self.broker.requeue_front(in_flight);
    }

    async fn receive(
        &self,
        destination: &str,
        timeout: Duration,
    ) -> MessagingResult<Option<Message>> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.broker.state.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            self.ensure_open()?;
            if let Some(message) = self.broker.pop(destination) {
                if self.transacted {
                    self.in_flight
                        .lock()
                        .push((destination.to_string(), message.clone()));
                }
                return Ok(Some(message));
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(None);
            }
        }
    }

    fn send(&self, destination: &str, message: &Message) -> MessagingResult<()> {
        self.ensure_open()?;
        let mut outgoing = message.clone();
        outgoing.delivery_count = 0;
        if self.transacted {
            self.pending_sends
                .lock()
                .push((destination.to_string(), outgoing));
        } else {
            self.broker.enqueue(destination, outgoing);
            self.broker.state.notify.notify_waiters();
        }
        Ok(())
    }

    fn commit(&self) -> MessagingResult<()> {
        if !self.transacted {
            return Ok(());
        }
        self.ensure_open()?;
        self.in_flight.lock().clear();
        let pending: Vec<_> = self.pending_sends.lock().drain(..).collect();
        for (destination, message) in pending {
            self.broker.enqueue(&destination, message);
        }
        self.broker.state.notify.notify_waiters();
        Ok(())
    }

    fn rollback(&self) -> MessagingResult<()> {
        if !self.transacted {
            return Ok(());
        }
        self.abandon_transaction();
        if self.broker.is_available() {
            Ok(())
        } else {
            Err(self.broker.connection_lost())
        }
    }
}

/// Consumer reading from an in-memory destination
#[derive(Debug, Clone)]
pub struct InMemoryConsumer {
    session: Arc<InMemorySession>,
    destination: String,
}

#[async_trait]
impl MessageConsumer for InMemoryConsumer {
    fn destination(&self) -> &str {
        &self.destination
    }

    async fn init(&self) -> MessagingResult<()> {
        self.session.open()
    }

    async fn close(&self) {
        self.session.close();
    }

    async fn receive(&self, timeout: Duration) -> MessagingResult<Option<Message>> {
        self.session.receive(&self.destination, timeout).await
    }
}

#[async_trait]
impl TransactionalConsumer for InMemoryConsumer {
    async fn commit(&self) -> MessagingResult<()> {
        self.session.commit()
    }

    async fn rollback(&self) -> MessagingResult<()> {
        self.session.rollback()
    }
}

/// Producer writing to an in-memory destination
#[derive(Debug, Clone)]
pub struct InMemoryProducer {
    session: Arc<InMemorySession>,
    destination: String,
}

#[async_trait]
impl MessageProducer for InMemoryProducer {
    fn destination(&self) -> &str {
        &self.destination
    }

    async fn init(&self) -> MessagingResult<()> {
        self.session.open()
    }

    async fn close(&self) {
        self.session.close();
    }

    async fn send(&self, message: &Message) -> MessagingResult<()> {
        self.session.send(&self.destination, message)
    }
}

/// Broker link used by a [`crate::connection::Connection`]
#[derive(Debug, Clone)]
pub struct InMemoryBrokerLink {
    broker: InMemoryBroker,
}

#[async_trait]
impl BrokerLink for InMemoryBrokerLink {
    fn describe(&self) -> String {
        format!("in-memory://{}", self.broker.name())
    }

    async fn connect(&self) -> MessagingResult<()> {
        self.broker
            .state
            .connect_attempts
            .fetch_add(1, Ordering::SeqCst);
        if self.broker.is_available() {
            Ok(())
        } else {
            Err(self.broker.connection_lost())
        }
    }

    async fn disconnect(&self) {}

    async fn check(&self) -> MessagingResult<()> {
        if self.broker.is_available() {
            Ok(())
        } else {
            Err(self.broker.connection_lost())
        }
    }

    fn set_failure_listener(&self, listener: Weak<dyn ConnectionFailureListener>) {
        self.broker.register_failure_listener(listener);
    }
}
