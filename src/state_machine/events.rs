use serde::{Deserialize, Serialize};

use super::states::ComponentState;

/// Underlying lifecycle transitions; each maps to one hook
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Init,
    Start,
    Stop,
    Close,
}

impl LifecycleEvent {
    /// Get a string representation of the event type for logging
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Close => "close",
        }
    }

    /// State the component must be in for this transition to run
    pub fn source_state(&self) -> ComponentState {
        match self {
            Self::Init => ComponentState::Closed,
            Self::Start => ComponentState::Initialised,
            Self::Stop => ComponentState::Started,
            Self::Close => ComponentState::Initialised,
        }
    }

    /// State reached when the hook succeeds
    pub fn target_state(&self) -> ComponentState {
        match self {
            Self::Init => ComponentState::Initialised,
            Self::Start => ComponentState::Started,
            Self::Stop => ComponentState::Initialised,
            Self::Close => ComponentState::Closed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_events_chain_through_states() {
        let forward = [LifecycleEvent::Init, LifecycleEvent::Start];
        let backward = [LifecycleEvent::Stop, LifecycleEvent::Close];

        let mut state = ComponentState::Closed;
        for event in forward.iter().chain(backward.iter()) {
            assert_eq!(event.source_state(), state, "{}", event.event_type());
            state = event.target_state();
        }
        assert_eq!(state, ComponentState::Closed);
    }
}
