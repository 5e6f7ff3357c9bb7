//! # Recovery Coordinator
//!
//! Drives one connection, and every component registered against it, from a
//! detected fault back to a running state:
//!
//! 1. claim the single-execution guard (or report `AlreadyInProgress`)
//! 2. snapshot the dependents that are currently started
//! 3. stop and close each of them, swallowing errors and panics
//! 4. reconnect the link with bounded, interruptible retries
//! 5. re-init and re-start the snapshot entries that allow auto start
//!
//! The guard is released when the cycle's [`RecoveryGuard`] is dropped, whatever
//! the outcome.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::Connection;
use crate::error::{ConduitError, ConduitResult};
use crate::logging::{log_error, log_recovery_event};
use crate::state_machine::Component;

/// Result of one call to [`Connection::on_connection_error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecoveryOutcome {
    /// Another cycle holds the single-execution guard
    AlreadyInProgress,
    /// The connection is not started; nothing to recover
    Inactive,
    Recovered {
        attempts: u32,
        restarted: usize,
        failed: usize,
    },
    /// `max_attempts` reached; dependents stay closed
    Exhausted { attempts: u32 },
    /// The connection was closed while the cycle was running
    Cancelled,
}

impl RecoveryOutcome {
    pub fn is_recovered(&self) -> bool {
        matches!(self, Self::Recovered { .. })
    }
}

/// Observability counters for a connection's recovery cycles
#[derive(Debug, Default)]
pub struct RecoveryStats {
    cycles_started: AtomicU64,
    cycles_skipped: AtomicU64,
    recovered: AtomicU64,
    exhausted: AtomicU64,
    cancelled: AtomicU64,
    restart_failures: AtomicU64,
    last_outcome: Mutex<Option<RecoveryOutcome>>,
    last_recovered_at: Mutex<Option<DateTime<Utc>>>,
}

/// Point-in-time copy of [`RecoveryStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryStatsSnapshot {
    pub cycles_started: u64,
    pub cycles_skipped: u64,
    pub recovered: u64,
    pub exhausted: u64,
    pub cancelled: u64,
    pub restart_failures: u64,
    pub last_outcome: Option<RecoveryOutcome>,
    pub last_recovered_at: Option<DateTime<Utc>>,
}

impl RecoveryStats {
    fn record(&self, outcome: RecoveryOutcome) {
        match outcome {
            RecoveryOutcome::AlreadyInProgress => {
                self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
                return;
            }
            RecoveryOutcome::Inactive => return,
            RecoveryOutcome::Recovered { failed, .. } => {
                self.recovered.fetch_add(1, Ordering::Relaxed);
                self.restart_failures
                    .fetch_add(failed as u64, Ordering::Relaxed);
                *self.last_recovered_at.lock() = Some(Utc::now());
            }
            RecoveryOutcome::Exhausted { .. } => {
                self.exhausted.fetch_add(1, Ordering::Relaxed);
            }
            RecoveryOutcome::Cancelled => {
                self.cancelled.fetch_add(1, Ordering::Relaxed);
            }
        }
        *self.last_outcome.lock() = Some(outcome);
    }

    pub fn snapshot(&self) -> RecoveryStatsSnapshot {
        RecoveryStatsSnapshot {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            recovered: self.recovered.load(Ordering::Relaxed),
            exhausted: self.exhausted.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            restart_failures: self.restart_failures.load(Ordering::Relaxed),
            last_outcome: *self.last_outcome.lock(),
            last_recovered_at: *self.last_recovered_at.lock(),
        }
    }
}

/// Holds the single-execution flag for the lifetime of a cycle
#[derive(Debug)]
pub struct RecoveryGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RecoveryGuard<'a> {
    /// Claim the flag; `None` when another cycle holds it
    pub fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RecoveryGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// State of one in-flight recovery cycle
pub struct RecoverySession {
    pub id: Uuid,
    pub connection: String,
    pub started_at: DateTime<Utc>,
    pub attempts: u32,
    /// Dependents that were started when the fault was handled
    pub dependents: Vec<Arc<dyn Component>>,
}

impl std::fmt::Debug for RecoverySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.dependents.iter().map(|d| d.name()).collect();
        f.debug_struct("RecoverySession")
            .field("id", &self.id)
            .field("connection", &self.connection)
            .field("started_at", &self.started_at)
            .field("attempts", &self.attempts)
            .field("dependents", &names)
            .finish()
    }
}

impl RecoverySession {
    pub fn begin(connection: &str, dependents: Vec<Arc<dyn Component>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            connection: connection.to_string(),
            started_at: Utc::now(),
            attempts: 0,
            dependents,
        }
    }

    /// Stop then close every snapshotted dependent
    async fn shutdown_dependents(&self) {
        for dependent in &self.dependents {
            let result = guarded(dependent.name(), "shutdown", async {
                dependent.request_stop().await?;
                dependent.request_close().await
            })
            .await;
            if let Err(error) = result {
                log_error(
                    dependent.name(),
                    "recovery_shutdown",
                    &error.to_string(),
                    Some(&self.connection),
                );
            }
        }
    }

    /// Re-init and re-start the auto-start dependents; returns (restarted, failed)
    async fn restart_dependents(&self) -> (usize, usize) {
        let mut restarted = 0;
        let mut failed = 0;
        for dependent in &self.dependents {
            if !dependent.auto_start() {
                debug!(
                    connection = %self.connection,
                    component = %dependent.name(),
                    "Dependent does not auto start; leaving it closed"
                );
                continue;
            }
            let result = guarded(dependent.name(), "restart", async {
                dependent.request_init().await?;
                dependent.request_start().await
            })
            .await;
            match result {
                Ok(()) => restarted += 1,
                Err(error) => {
                    failed += 1;
                    log_error(
                        dependent.name(),
                        "recovery_restart",
                        &error.to_string(),
                        Some(&self.connection),
                    );
                }
            }
        }
        (restarted, failed)
    }
}

/// Run a dependent's lifecycle calls, turning a panic into an error
async fn guarded<F>(component: &str, step: &str, calls: F) -> ConduitResult<()>
where
    F: std::future::Future<Output = ConduitResult<()>>,
{
    match AssertUnwindSafe(calls).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(ConduitError::from_panic(
            &format!("{component} during recovery {step}"),
            payload,
        )),
    }
}

enum ReconnectResult {
    Connected,
    Exhausted,
    Cancelled,
}

/// Per-connection recovery protocol
#[derive(Debug)]
pub struct RecoveryCoordinator {
    single_execution: bool,
    in_progress: AtomicBool,
    stats: RecoveryStats,
}

impl RecoveryCoordinator {
    pub fn new(single_execution: bool) -> Self {
        Self {
            single_execution,
            in_progress: AtomicBool::new(false),
            stats: RecoveryStats::default(),
        }
    }

    pub fn is_recovering(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> RecoveryStatsSnapshot {
        self.stats.snapshot()
    }

    /// Execute one recovery cycle for `connection`
    pub async fn run(&self, connection: &Connection, cancel: CancellationToken) -> RecoveryOutcome {
        let _guard = if self.single_execution {
            match RecoveryGuard::acquire(&self.in_progress) {
                Some(guard) => Some(guard),
                None => {
                    debug!(
                        connection = %connection.name(),
                        "Recovery already in progress; skipping"
                    );
                    self.stats.record(RecoveryOutcome::AlreadyInProgress);
                    return RecoveryOutcome::AlreadyInProgress;
                }
            }
        } else {
            None
        };

        self.stats.cycles_started.fetch_add(1, Ordering::Relaxed);
        let dependents = connection.started_dependents();
        let mut session = RecoverySession::begin(connection.name(), dependents);
        log_recovery_event(
            &session.connection,
            "begin",
            None,
            Some(session.dependents.len()),
            Some(&session.id.to_string()),
        );

        session.shutdown_dependents().await;
        connection.link().disconnect().await;

        let outcome = match self.reconnect(connection, &mut session, &cancel).await {
            ReconnectResult::Connected if cancel.is_cancelled() => RecoveryOutcome::Cancelled,
            ReconnectResult::Connected => {
                let (restarted, failed) = session.restart_dependents().await;
                info!(
                    connection = %session.connection,
                    session_id = %session.id,
                    attempts = session.attempts,
                    restarted = restarted,
                    failed = failed,
                    "Connection recovered"
                );
                RecoveryOutcome::Recovered {
                    attempts: session.attempts,
                    restarted,
                    failed,
                }
            }
            ReconnectResult::Exhausted => {
                warn!(
                    connection = %session.connection,
                    session_id = %session.id,
                    attempts = session.attempts,
                    "Reconnect attempts exhausted; operator action required"
                );
                RecoveryOutcome::Exhausted {
                    attempts: session.attempts,
                }
            }
            ReconnectResult::Cancelled => RecoveryOutcome::Cancelled,
        };

        log_recovery_event(
            &session.connection,
            "end",
            Some(session.attempts),
            Some(session.dependents.len()),
            Some(&format!("{outcome:?}")),
        );
        self.stats.record(outcome);
        outcome
    }

    async fn reconnect(
        &self,
        connection: &Connection,
        session: &mut RecoverySession,
        cancel: &CancellationToken,
    ) -> ReconnectResult {
        let config = connection.config();
        loop {
            if cancel.is_cancelled() {
                return ReconnectResult::Cancelled;
            }
            session.attempts += 1;
            match connection.link().connect().await {
                Ok(()) => return ReconnectResult::Connected,
                Err(error) => {
                    log_recovery_event(
                        &session.connection,
                        "reconnect_failed",
                        Some(session.attempts),
                        None,
                        Some(&error.to_string()),
                    );
                }
            }

            if let Some(max) = config.max_attempts {
                if session.attempts >= max {
                    return ReconnectResult::Exhausted;
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => return ReconnectResult::Cancelled,
                _ = tokio::time::sleep(config.retry_interval()) => {}
            }
        }
    }
}
