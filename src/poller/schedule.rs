use std::time::Duration;

use crate::config::PollerConfig;
use crate::error::{ConduitError, ConduitResult};

/// When a poller fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollSchedule {
    Fixed(Duration),
    /// Uniformly random delay in `[min, max]` before every cycle
    Random { min: Duration, max: Duration },
}

impl PollSchedule {
    pub fn from_config(config: &PollerConfig) -> Self {
        let interval = Duration::from_millis(config.interval_ms);
        match config.random_max_interval_ms {
            Some(max) if max > config.interval_ms => Self::Random {
                min: interval,
                max: Duration::from_millis(max),
            },
            _ => Self::Fixed(interval),
        }
    }

    /// Reject schedules a timer cannot drive
    pub fn validate(&self, poller: &str) -> ConduitResult<()> {
        let component = format!("poller '{poller}'");
        match *self {
            Self::Fixed(interval) if interval.is_zero() => Err(ConduitError::configuration(
                component,
                "interval must be greater than zero",
            )),
            Self::Random { min, .. } if min.is_zero() => Err(ConduitError::configuration(
                component,
                "random schedule lower bound must be greater than zero",
            )),
            Self::Random { min, max } if max < min => Err(ConduitError::configuration(
                component,
                format!("random schedule upper bound {max:?} is below {min:?}"),
            )),
            _ => Ok(()),
        }
    }

    /// Delay before the next cycle
    pub fn next_delay(&self) -> Duration {
        match *self {
            Self::Fixed(interval) => interval,
            Self::Random { min, max } if max > min => {
                let min_ms = min.as_millis() as u64;
                let max_ms = max.as_millis() as u64;
                Duration::from_millis(fastrand::u64(min_ms..=max_ms))
            }
            Self::Random { min, .. } => min,
        }
    }
}
