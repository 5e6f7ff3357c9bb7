//! # Messaging Module
//!
//! Message model, collaborator traits and the in-memory broker provider.
//! Broker-specific bindings live outside this crate and implement the traits here.

pub mod errors;
pub mod message;
pub mod providers;
pub mod traits;

pub use errors::{MessagingError, MessagingResult};
pub use message::Message;
pub use providers::{InMemoryBroker, InMemoryBrokerLink, InMemoryConsumer, InMemoryProducer};
pub use traits::{MessageConsumer, MessageListener, MessageProducer, TransactionalConsumer};
