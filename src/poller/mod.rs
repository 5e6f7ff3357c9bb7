//! # Poller
//!
//! Periodically triggers a [`PollCallback`] on a background task. Cycles never
//! overlap: the scheduler awaits each cycle before waiting for the next tick,
//! and [`Poller::poll_now`] is rejected while a cycle is running.

mod lock;
mod polling_consumer;
mod schedule;

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub use lock::{DestinationLock, LocalDestinationLock, LockClaim};
pub use polling_consumer::PollingConsumer;
pub use schedule::PollSchedule;

use crate::error::{ConduitError, ConduitResult};
use crate::state_machine::{ComponentState, ComponentStateMachine, LifecycleHooks};

/// Work performed once per poll
#[async_trait]
pub trait PollCallback: Send + Sync {
    /// Returns how many items the cycle handled
    async fn invoke(&self) -> ConduitResult<usize>;
}

/// Result of a manual poll request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollAttempt {
    Completed { handled: usize },
    /// A cycle was already running
    Rejected,
}

/// Poll cycle counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollerStats {
    pub cycles: u64,
    pub failed_cycles: u64,
    pub rejected_requests: u64,
    pub items_handled: u64,
}

struct PollerCore {
    name: String,
    callback: Arc<dyn PollCallback>,
    in_cycle: AtomicBool,
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
    rejected_requests: AtomicU64,
    items_handled: AtomicU64,
}

/// Clears the in-cycle flag when the cycle ends, even by panic
struct CycleGuard<'a>(&'a AtomicBool);

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl PollerCore {
    /// Run one cycle unless another is in progress
    async fn try_cycle(&self) -> PollAttempt {
        if self
            .in_cycle
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.rejected_requests.fetch_add(1, Ordering::Relaxed);
            return PollAttempt::Rejected;
        }
        let _guard = CycleGuard(&self.in_cycle);

        self.cycles.fetch_add(1, Ordering::Relaxed);
        let result = match AssertUnwindSafe(self.callback.invoke()).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(ConduitError::from_panic(&self.name, payload)),
        };
        match result {
            Ok(handled) => {
                self.items_handled
                    .fetch_add(handled as u64, Ordering::Relaxed);
                if handled > 0 {
                    debug!(poller = %self.name, handled = handled, "Poll cycle completed");
                }
                PollAttempt::Completed { handled }
            }
            Err(error) => {
                self.failed_cycles.fetch_add(1, Ordering::Relaxed);
                warn!(poller = %self.name, error = %error, "Poll cycle failed");
                PollAttempt::Completed { handled: 0 }
            }
        }
    }

    async fn run(&self, schedule: PollSchedule, cancel: CancellationToken) {
        match schedule {
            PollSchedule::Fixed(interval) => {
                let mut ticker = tokio::time::interval(interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                ticker.tick().await;
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = ticker.tick() => {}
                    }
                    self.try_cycle().await;
                }
            }
            PollSchedule::Random { .. } => loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(schedule.next_delay()) => {}
                }
                self.try_cycle().await;
            },
        }
    }
}

struct Worker {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

/// Scheduled driver of a [`PollCallback`]
pub struct Poller {
    lifecycle: ComponentStateMachine,
    schedule: PollSchedule,
    core: Arc<PollerCore>,
    worker: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for Poller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Poller")
            .field("name", &self.core.name)
            .field("state", &self.lifecycle.state())
            .field("schedule", &self.schedule)
            .field("in_cycle", &self.core.in_cycle.load(Ordering::Relaxed))
            .finish()
    }
}

impl Poller {
    pub fn new(
        name: impl Into<String>,
        schedule: PollSchedule,
        callback: Arc<dyn PollCallback>,
    ) -> Self {
        let name = name.into();
        Self {
            lifecycle: ComponentStateMachine::new(name.clone()),
            schedule,
            core: Arc::new(PollerCore {
                name,
                callback,
                in_cycle: AtomicBool::new(false),
                cycles: AtomicU64::new(0),
                failed_cycles: AtomicU64::new(0),
                rejected_requests: AtomicU64::new(0),
                items_handled: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn schedule(&self) -> PollSchedule {
        self.schedule
    }

    pub fn is_polling(&self) -> bool {
        self.core.in_cycle.load(Ordering::Acquire)
    }

    /// Trigger a cycle immediately; rejected while one is running
    pub async fn poll_now(&self) -> ConduitResult<PollAttempt> {
        if self.lifecycle.state() != ComponentState::Started {
            return Err(ConduitError::lifecycle(
                self.lifecycle.name(),
                "poll_now",
                format!("poller is {}", self.lifecycle.state()),
            ));
        }
        Ok(self.core.try_cycle().await)
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            cycles: self.core.cycles.load(Ordering::Relaxed),
            failed_cycles: self.core.failed_cycles.load(Ordering::Relaxed),
            rejected_requests: self.core.rejected_requests.load(Ordering::Relaxed),
            items_handled: self.core.items_handled.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl LifecycleHooks for Poller {
    fn state_machine(&self) -> &ComponentStateMachine {
        &self.lifecycle
    }

    async fn do_init(&self) -> ConduitResult<()> {
        self.schedule.validate(&self.core.name)
    }

    async fn do_start(&self) -> ConduitResult<()> {
        let cancel = CancellationToken::new();
        let task_cancel = cancel.clone();
        let core = Arc::clone(&self.core);
        let schedule = self.schedule;
        let handle = tokio::spawn(async move { core.run(schedule, task_cancel).await });
        *self.worker.lock() = Some(Worker { cancel, handle });
        info!(poller = %self.core.name, schedule = ?self.schedule, "Poller started");
        Ok(())
    }

    /// Cancels the schedule and waits for a running cycle to finish
    async fn do_stop(&self) -> ConduitResult<()> {
        let worker = self.worker.lock().take();
        if let Some(Worker { cancel, handle }) = worker {
            cancel.cancel();
            if let Err(join_error) = handle.await {
                error!(
                    poller = %self.core.name,
                    error = %join_error,
                    "Poller task ended abnormally"
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Component;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Counting {
        calls: AtomicUsize,
        running: AtomicUsize,
        max_running: AtomicUsize,
    }

    #[async_trait]
    impl PollCallback for Counting {
        async fn invoke(&self) -> ConduitResult<usize> {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_running.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(15)).await;
            self.running.fetch_sub(1, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(1)
        }
    }

    #[tokio::test]
    async fn test_fixed_schedule_polls_repeatedly_without_overlap() {
        let callback = Arc::new(Counting::default());
        let poller = Poller::new(
            "p",
            PollSchedule::Fixed(Duration::from_millis(5)),
            callback.clone(),
        );
        poller.request_start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        poller.request_stop().await.unwrap();

        let calls = callback.calls.load(Ordering::SeqCst);
        assert!(calls >= 3, "expected several cycles, got {calls}");
        assert_eq!(callback.max_running.load(Ordering::SeqCst), 1);
        assert_eq!(poller.stats().items_handled, calls as u64);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(callback.calls.load(Ordering::SeqCst), calls, "no cycles after stop");
    }

    #[tokio::test]
    async fn test_random_schedule_polls() {
        let callback = Arc::new(Counting::default());
        let poller = Poller::new(
            "p",
            PollSchedule::Random {
                min: Duration::from_millis(5),
                max: Duration::from_millis(15),
            },
            callback.clone(),
        );
        poller.request_start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        poller.request_close().await.unwrap();
        assert!(callback.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_poll_now_rejected_while_cycle_runs() {
        struct Blocking {
            entered: Notify,
            release: Notify,
        }

        #[async_trait]
        impl PollCallback for Blocking {
            async fn invoke(&self) -> ConduitResult<usize> {
                self.entered.notify_one();
                self.release.notified().await;
                Ok(0)
            }
        }

        let callback = Arc::new(Blocking {
            entered: Notify::new(),
            release: Notify::new(),
        });
        let poller = Arc::new(Poller::new(
            "p",
            PollSchedule::Fixed(Duration::from_secs(3600)),
            callback.clone(),
        ));
        poller.request_start().await.unwrap();

        let first = {
            let poller = Arc::clone(&poller);
            tokio::spawn(async move { poller.poll_now().await })
        };
        callback.entered.notified().await;
        assert!(poller.is_polling());
        assert_eq!(poller.poll_now().await.unwrap(), PollAttempt::Rejected);

        callback.release.notify_one();
        assert_eq!(
            first.await.unwrap().unwrap(),
            PollAttempt::Completed { handled: 0 }
        );
        assert_eq!(poller.stats().rejected_requests, 1);
        poller.request_close().await.unwrap();
    }

    #[tokio::test]
    async fn test_zero_interval_fails_init() {
        let poller = Poller::new(
            "p",
            PollSchedule::Fixed(Duration::ZERO),
            Arc::new(Counting::default()),
        );
        let err = poller.request_start().await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Configuration);
        assert_eq!(poller.state(), ComponentState::Closed);
        assert_eq!(poller.stats().cycles, 0);
    }

    #[tokio::test]
    async fn test_poll_now_requires_started() {
        let poller = Poller::new(
            "p",
            PollSchedule::Fixed(Duration::from_secs(1)),
            Arc::new(Counting::default()),
        );
        assert!(poller.poll_now().await.is_err());
    }

    #[tokio::test]
    async fn test_failing_cycle_is_counted_and_poller_keeps_running() {
        struct Failing;

        #[async_trait]
        impl PollCallback for Failing {
            async fn invoke(&self) -> ConduitResult<usize> {
                Err(ConduitError::unexpected("receive failed"))
            }
        }

        let poller = Poller::new(
            "p",
            PollSchedule::Fixed(Duration::from_millis(5)),
            Arc::new(Failing),
        );
        poller.request_start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(poller.state(), ComponentState::Started);
        poller.request_stop().await.unwrap();
        let stats = poller.stats();
        assert!(stats.failed_cycles >= 2);
        assert_eq!(stats.failed_cycles, stats.cycles);
    }
}
