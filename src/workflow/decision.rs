//! Commit/rollback policy of transacted workflows.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{ConduitError, ErrorKind};

/// How the service chain ended for one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainOutcome {
    Success,
    /// A service reported an expected `Processing` failure
    ProcessingFailure,
    /// Produce failures, any other error kind, or a panic
    UnexpectedFailure,
}

impl ChainOutcome {
    pub fn from_result(result: &Result<(), ConduitError>) -> Self {
        match result {
            Ok(()) => Self::Success,
            Err(error) => Self::from_kind(error.kind()),
        }
    }

    pub fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::Processing => Self::ProcessingFailure,
            _ => Self::UnexpectedFailure,
        }
    }
}

/// Per-message decision taken after the chain ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionDecision {
    CommitToMain,
    CommitToErrorHandler,
    Rollback,
}

impl TransactionDecision {
    /// Apply the decision table
    ///
    /// | outcome            | strict   | lenient + handler    | lenient, no handler |
    /// |--------------------|----------|----------------------|---------------------|
    /// | success            | main     | main                 | main                |
    /// | processing failure | rollback | error handler        | rollback            |
    /// | other failure      | rollback | rollback             | rollback            |
    pub fn decide(outcome: ChainOutcome, strict: bool, has_error_handler: bool) -> Self {
        match outcome {
            ChainOutcome::Success => Self::CommitToMain,
            ChainOutcome::ProcessingFailure if !strict && has_error_handler => {
                Self::CommitToErrorHandler
            }
            ChainOutcome::ProcessingFailure | ChainOutcome::UnexpectedFailure => Self::Rollback,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CommitToMain => "commit_to_main",
            Self::CommitToErrorHandler => "commit_to_error_handler",
            Self::Rollback => "rollback",
        }
    }
}

impl fmt::Display for TransactionDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
