//! # Component Lifecycle
//!
//! [`ComponentStateMachine`] is embedded by every stateful entity. It owns the
//! current state, the transition counters and a per-component lock that serialises
//! lifecycle calls coming from different callers (recovery cycles, operator
//! commands, owning channels).
//!
//! Entities supply their behaviour through [`LifecycleHooks`]; the blanket
//! [`Component`] implementation gives them `request_init/start/stop/close`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tracing::{debug, warn};

use super::events::LifecycleEvent;
use super::states::ComponentState;
use crate::error::{ConduitError, ConduitResult, ErrorKind};
use crate::logging::log_lifecycle_transition;

/// Hooks a concrete entity provides; every hook defaults to a no-op
#[async_trait]
pub trait LifecycleHooks: Send + Sync {
    /// The embedded state machine
    fn state_machine(&self) -> &ComponentStateMachine;

    /// Whether recovery cycles may restart this component
    fn auto_start(&self) -> bool {
        true
    }

    async fn do_init(&self) -> ConduitResult<()> {
        Ok(())
    }

    async fn do_start(&self) -> ConduitResult<()> {
        Ok(())
    }

    async fn do_stop(&self) -> ConduitResult<()> {
        Ok(())
    }

    async fn do_close(&self) -> ConduitResult<()> {
        Ok(())
    }
}

/// Snapshot of the successful-transition counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleCounts {
    pub init_count: u64,
    pub start_count: u64,
    pub stop_count: u64,
    pub close_count: u64,
}

#[derive(Debug, Default)]
struct LifecycleCounters {
    init: AtomicU64,
    start: AtomicU64,
    stop: AtomicU64,
    close: AtomicU64,
}

impl LifecycleCounters {
    fn record(&self, event: LifecycleEvent) {
        let counter = match event {
            LifecycleEvent::Init => &self.init,
            LifecycleEvent::Start => &self.start,
            LifecycleEvent::Stop => &self.stop,
            LifecycleEvent::Close => &self.close,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> LifecycleCounts {
        LifecycleCounts {
            init_count: self.init.load(Ordering::Relaxed),
            start_count: self.start.load(Ordering::Relaxed),
            stop_count: self.stop.load(Ordering::Relaxed),
            close_count: self.close.load(Ordering::Relaxed),
        }
    }
}

/// State machine helper embedded in every component
#[derive(Debug)]
pub struct ComponentStateMachine {
    name: String,
    transition_lock: Mutex<()>,
    state_tx: watch::Sender<ComponentState>,
    counters: LifecycleCounters,
}

impl ComponentStateMachine {
    pub fn new(name: impl Into<String>) -> Self {
        let (state_tx, _) = watch::channel(ComponentState::Closed);
        Self {
            name: name.into(),
            transition_lock: Mutex::new(()),
            state_tx,
            counters: LifecycleCounters::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ComponentState {
        *self.state_tx.borrow()
    }

    pub fn counts(&self) -> LifecycleCounts {
        self.counters.snapshot()
    }

    /// Receive every state change
    pub fn subscribe(&self) -> watch::Receiver<ComponentState> {
        self.state_tx.subscribe()
    }

    /// Wait until the component reaches `target`; false on timeout
    pub async fn wait_for_state(&self, target: ComponentState, timeout: Duration) -> bool {
        let mut rx = self.state_tx.subscribe();
        let reached = matches!(
            tokio::time::timeout(timeout, rx.wait_for(|state| *state == target)).await,
            Ok(Ok(_))
        );
        reached
    }

    pub async fn request_init<H: LifecycleHooks + ?Sized>(&self, hooks: &H) -> ConduitResult<()> {
        let _guard = self.transition_lock.lock().await;
        self.init_locked(hooks).await
    }

    /// Init (when Closed) then start; a no-op when already Started
    pub async fn request_start<H: LifecycleHooks + ?Sized>(&self, hooks: &H) -> ConduitResult<()> {
        let _guard = self.transition_lock.lock().await;
        self.init_locked(hooks).await?;
        if self.state() == ComponentState::Initialised {
            self.apply(hooks, LifecycleEvent::Start).await?;
        }
        Ok(())
    }

    pub async fn request_stop<H: LifecycleHooks + ?Sized>(&self, hooks: &H) -> ConduitResult<()> {
        let _guard = self.transition_lock.lock().await;
        self.stop_locked(hooks).await
    }

    /// Stop (when Started) then close; a no-op when already Closed
    pub async fn request_close<H: LifecycleHooks + ?Sized>(&self, hooks: &H) -> ConduitResult<()> {
        let _guard = self.transition_lock.lock().await;
        self.stop_locked(hooks).await?;
        if self.state() == ComponentState::Initialised {
            self.apply(hooks, LifecycleEvent::Close).await?;
        }
        Ok(())
    }

    async fn init_locked<H: LifecycleHooks + ?Sized>(&self, hooks: &H) -> ConduitResult<()> {
        if self.state() == ComponentState::Closed {
            self.apply(hooks, LifecycleEvent::Init).await?;
        }
        Ok(())
    }

    async fn stop_locked<H: LifecycleHooks + ?Sized>(&self, hooks: &H) -> ConduitResult<()> {
        if self.state() == ComponentState::Started {
            self.apply(hooks, LifecycleEvent::Stop).await?;
        }
        Ok(())
    }

    /// Run one hook; state and counters only move when it succeeds
    async fn apply<H: LifecycleHooks + ?Sized>(
        &self,
        hooks: &H,
        event: LifecycleEvent,
    ) -> ConduitResult<()> {
        let from = self.state();
        debug_assert_eq!(from, event.source_state());

        let result = match event {
            LifecycleEvent::Init => hooks.do_init().await,
            LifecycleEvent::Start => hooks.do_start().await,
            LifecycleEvent::Stop => hooks.do_stop().await,
            LifecycleEvent::Close => hooks.do_close().await,
        };

        match result {
            Ok(()) => {
                let to = event.target_state();
                self.state_tx.send_replace(to);
                self.counters.record(event);
                log_lifecycle_transition(&self.name, event.event_type(), from, to, "success");
                Ok(())
            }
            Err(error) => {
                warn!(
                    component = %self.name,
                    transition = event.event_type(),
                    state = %from,
                    error = %error,
                    "Lifecycle transition failed; component left at last reached state"
                );
                Err(self.as_lifecycle_error(event, error))
            }
        }
    }

    fn as_lifecycle_error(&self, event: LifecycleEvent, error: ConduitError) -> ConduitError {
        match error.kind() {
            ErrorKind::Lifecycle | ErrorKind::Configuration => error,
            _ => {
                debug!(component = %self.name, kind = %error.kind(), "Wrapping hook error");
                ConduitError::lifecycle(self.name.clone(), event.event_type(), error.to_string())
            }
        }
    }
}

/// Object-safe lifecycle surface used by connections, channels and the runtime
#[async_trait]
pub trait Component: Send + Sync {
    fn name(&self) -> &str;

    fn state(&self) -> ComponentState;

    fn counts(&self) -> LifecycleCounts;

    fn auto_start(&self) -> bool;

    async fn request_init(&self) -> ConduitResult<()>;

    async fn request_start(&self) -> ConduitResult<()>;

    async fn request_stop(&self) -> ConduitResult<()>;

    async fn request_close(&self) -> ConduitResult<()>;

    async fn wait_for_state(&self, target: ComponentState, timeout: Duration) -> bool;
}

#[async_trait]
impl<T> Component for T
where
    T: LifecycleHooks + 'static,
{
    fn name(&self) -> &str {
        self.state_machine().name()
    }

    fn state(&self) -> ComponentState {
        self.state_machine().state()
    }

    fn counts(&self) -> LifecycleCounts {
        self.state_machine().counts()
    }

    fn auto_start(&self) -> bool {
        LifecycleHooks::auto_start(self)
    }

    async fn request_init(&self) -> ConduitResult<()> {
        self.state_machine().request_init(self).await
    }

    async fn request_start(&self) -> ConduitResult<()> {
        self.state_machine().request_start(self).await
    }

    async fn request_stop(&self) -> ConduitResult<()> {
        self.state_machine().request_stop(self).await
    }

    async fn request_close(&self) -> ConduitResult<()> {
        self.state_machine().request_close(self).await
    }

    async fn wait_for_state(&self, target: ComponentState, timeout: Duration) -> bool {
        self.state_machine().wait_for_state(target, timeout).await
    }
}
