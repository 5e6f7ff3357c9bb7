#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use conduit_core::error::{ConduitError, ConduitResult};
use conduit_core::messaging::Message;
use conduit_core::workflow::Service;
use parking_lot::Mutex;

/// Fails every message with a processing error
#[derive(Debug, Default)]
pub struct AlwaysFail {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Service for AlwaysFail {
    fn name(&self) -> &str {
        "always-fail"
    }

    async fn process(&self, _message: &mut Message) -> ConduitResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ConduitError::processing("always-fail", "rejected"))
    }
}

/// Fails at random, but never more than `max_failures` times for the same payload
#[derive(Debug)]
pub struct Flaky {
    rng: Mutex<fastrand::Rng>,
    failure_rate: f64,
    max_failures: usize,
    failures: Mutex<HashMap<String, usize>>,
}

impl Flaky {
    pub fn new(seed: u64, failure_rate: f64, max_failures: usize) -> Self {
        Self {
            rng: Mutex::new(fastrand::Rng::with_seed(seed)),
            failure_rate,
            max_failures,
            failures: Mutex::new(HashMap::new()),
        }
    }

    pub fn total_failures(&self) -> usize {
        self.failures.lock().values().sum()
    }
}

#[async_trait]
impl Service for Flaky {
    fn name(&self) -> &str {
        "flaky"
    }

    async fn process(&self, message: &mut Message) -> ConduitResult<()> {
        let roll = self.rng.lock().f64();
        let mut failures = self.failures.lock();
        let seen = failures.entry(message.payload_text()).or_insert(0);
        if roll < self.failure_rate && *seen < self.max_failures {
            *seen += 1;
            return Err(ConduitError::processing("flaky", "random failure"));
        }
        Ok(())
    }
}

/// Records every payload it sees, in order
#[derive(Debug, Default)]
pub struct Recorder {
    seen: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.seen.lock().len()
    }
}

#[async_trait]
impl Service for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn process(&self, message: &mut Message) -> ConduitResult<()> {
        self.seen.lock().push(message.payload_text());
        Ok(())
    }
}
