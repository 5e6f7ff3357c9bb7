use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state shared by connections, channels and workflows
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ComponentState {
    /// Initial state; no resources held
    #[default]
    Closed,
    /// Resources prepared, not processing
    Initialised,
    /// Fully running
    Started,
}

impl ComponentState {
    /// Check if the component is processing
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Started)
    }

    /// Check if the component holds no resources
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

impl fmt::Display for ComponentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Initialised => write!(f, "initialised"),
            Self::Started => write!(f, "started"),
        }
    }
}

impl std::str::FromStr for ComponentState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(Self::Closed),
            "initialised" | "initialized" => Ok(Self::Initialised),
            "started" => Ok(Self::Started),
            _ => Err(format!("Invalid component state: {s}")),
        }
    }
}
