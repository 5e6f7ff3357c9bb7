//! # Workflows
//!
//! A workflow binds a consumer, a service chain and a producer. Two flavours:
//!
//! - [`TransactedWorkflow`]: pull-style, one message per broker transaction,
//!   commit or rollback per [`TransactionDecision`]
//! - [`StandardWorkflow`]: push-style via a poller, no transaction

pub mod decision;
pub mod error_handler;
pub mod interceptor;
pub mod service;
pub mod standard;
pub mod transacted;

pub use decision::{ChainOutcome, TransactionDecision};
pub use error_handler::{
    MessageErrorHandler, StandardMessageErrorHandler, ERROR_KIND_KEY, ERROR_MESSAGE_KEY,
};
pub use interceptor::{
    MessageDisposition, MessageMetrics, MessageMetricsInterceptor, WorkflowInterceptor,
};
pub use service::{Service, ServiceChain};
pub use standard::{StandardWorkflow, StandardWorkflowBuilder};
pub use transacted::{TransactedWorkflow, TransactedWorkflowBuilder};

use crate::channel::ChannelContext;
use crate::state_machine::Component;

/// A lifecycle component a [`crate::channel::Channel`] can own
pub trait Workflow: Component {
    /// Bind the workflow to its owning channel's gate and connection
    fn attach(&self, context: ChannelContext);
}
