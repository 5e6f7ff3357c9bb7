//! # Messaging Providers
//!
//! Concrete broker bindings shipped with the crate.

pub mod in_memory;

pub use in_memory::{
    InMemoryBroker, InMemoryBrokerLink, InMemoryConsumer, InMemoryProducer, InMemorySession,
};
