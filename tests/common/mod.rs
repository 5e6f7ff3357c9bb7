//! Shared helpers for the integration tests

pub mod fixtures;
pub mod services;
pub mod strategies;

pub use fixtures::*;
pub use services::*;
pub use strategies::*;
