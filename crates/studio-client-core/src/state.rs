//! Execution lifecycle states and the updates announced for them.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Current execution state of a controller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Nothing has run yet, or the last call produced no values.
    #[default]
    Idle,
    /// A start or resume call is draining its stream.
    Executing,
    /// The last run reached the end node.
    Stopped,
    /// The last run paused at a node.
    Interrupted,
    /// The last call failed.
    Errored,
}

impl ExecutionState {
    /// Whether this is one of the terminal labels.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Stopped | Self::Interrupted | Self::Errored)
    }
}

/// Lifecycle transition published as `state-updated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateUpdate {
    Start,
    Stop,
    Interrupted,
    Error,
}

impl StateUpdate {
    /// Wire label.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Interrupted => "interrupted",
            Self::Error => "error",
        }
    }

    /// State entered by this transition.
    #[must_use]
    pub const fn target(self) -> ExecutionState {
        match self {
            Self::Start => ExecutionState::Executing,
            Self::Stop => ExecutionState::Stopped,
            Self::Interrupted => ExecutionState::Interrupted,
            Self::Error => ExecutionState::Errored,
        }
    }

    /// Whether this update ends a call.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Start)
    }
}

impl fmt::Display for StateUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
