//! Observers notified around every message a workflow handles.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::messaging::Message;

/// Final disposition of one message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageDisposition {
    /// Sent to the main producer (and committed, for transacted workflows)
    Produced,
    /// Committed without producing, on request of a service
    Skipped,
    /// Committed after the error handler took the message
    ErrorHandled,
    /// Transaction rolled back; the message will be redelivered
    RolledBack,
    /// Non-transacted failure with no error handler; the message is dropped
    Failed,
}

impl fmt::Display for MessageDisposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Produced => "produced",
            Self::Skipped => "skipped",
            Self::ErrorHandled => "error_handled",
            Self::RolledBack => "rolled_back",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Hooks invoked on the workflow's processing task; keep them cheap
pub trait WorkflowInterceptor: Send + Sync {
    fn workflow_start(&self, _workflow: &str, _message: &Message) {}

    fn workflow_end(&self, _workflow: &str, _message: &Message, _disposition: MessageDisposition) {}
}

/// Counts messages per disposition
#[derive(Debug, Default)]
pub struct MessageMetricsInterceptor {
    started: AtomicU64,
    dispositions: Mutex<HashMap<MessageDisposition, u64>>,
}

/// Point-in-time copy of [`MessageMetricsInterceptor`] counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageMetrics {
    pub started: u64,
    pub produced: u64,
    pub skipped: u64,
    pub error_handled: u64,
    pub rolled_back: u64,
    pub failed: u64,
}

impl MessageMetrics {
    pub fn completed(&self) -> u64 {
        self.produced + self.skipped + self.error_handled + self.rolled_back + self.failed
    }
}

impl MessageMetricsInterceptor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, disposition: MessageDisposition) -> u64 {
        self.dispositions
            .lock()
            .get(&disposition)
            .copied()
            .unwrap_or(0)
    }

    pub fn snapshot(&self) -> MessageMetrics {
        MessageMetrics {
            started: self.started.load(Ordering::Relaxed),
            produced: self.count(MessageDisposition::Produced),
            skipped: self.count(MessageDisposition::Skipped),
            error_handled: self.count(MessageDisposition::ErrorHandled),
            rolled_back: self.count(MessageDisposition::RolledBack),
            failed: self.count(MessageDisposition::Failed),
        }
    }
}

impl WorkflowInterceptor for MessageMetricsInterceptor {
    fn workflow_start(&self, _workflow: &str, _message: &Message) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    fn workflow_end(&self, _workflow: &str, _message: &Message, disposition: MessageDisposition) {
        *self.dispositions.lock().entry(disposition).or_insert(0) += 1;
    }
}
