// Component lifecycle state machine
//
// Every stateful entity (connection, channel, workflow, poller) embeds a
// ComponentStateMachine and implements LifecycleHooks; the blanket Component
// implementation provides the request_* transitions.

pub mod events;
pub mod lifecycle;
pub mod states;

pub use events::LifecycleEvent;
pub use lifecycle::{Component, ComponentStateMachine, LifecycleCounts, LifecycleHooks};
pub use states::ComponentState;
