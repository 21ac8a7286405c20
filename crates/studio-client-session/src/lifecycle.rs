//! Lifecycle state machine.
//!
//! `Idle -> Executing -> {Stopped, Interrupted, Errored}`, re-entered through
//! `Executing` on every start or resume call.

use studio_client_core::{ExecutionState, StateUpdate, StreamEvent, Termination};

use crate::ExecutorError;

/// How a start or resume call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// The stream ended without producing any value.
    NoResult,
    /// The last value was a terminal tuple at `__END__`.
    Completed,
    /// The last value was a terminal tuple at any other node.
    Interrupted,
    /// The call failed.
    Failed,
}

impl CallOutcome {
    /// Classify the result of a call.
    #[must_use]
    pub fn from_result(result: &Result<Option<StreamEvent>, ExecutorError>) -> Self {
        match result {
            Err(_) => Self::Failed,
            Ok(None) => Self::NoResult,
            Ok(Some(event)) => match event.termination() {
                Some(Termination::Completed) => Self::Completed,
                Some(Termination::Interrupted { .. }) => Self::Interrupted,
                None => Self::Failed,
            },
        }
    }
}

/// Execution state plus the executing flag.
#[derive(Debug, Default)]
pub struct Lifecycle {
    state: ExecutionState,
    executing: bool,
}

impl Lifecycle {
    /// Create an idle lifecycle.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> ExecutionState {
        self.state
    }

    /// Whether a call is in flight.
    #[must_use]
    pub const fn is_executing(&self) -> bool {
        self.executing
    }

    /// Enter `Executing` for a new call.
    pub fn begin(&mut self) -> StateUpdate {
        self.executing = true;
        self.state = ExecutionState::Executing;
        tracing::debug!("lifecycle: executing");
        StateUpdate::Start
    }

    /// Leave `Executing`.
    ///
    /// The executing flag is cleared first, so it is already false when the
    /// returned update is published. `NoResult` returns to `Idle` and yields
    /// no update.
    pub fn finish(&mut self, outcome: CallOutcome) -> Option<StateUpdate> {
        self.executing = false;
        let update = match outcome {
            CallOutcome::NoResult => {
                self.state = ExecutionState::Idle;
                return None;
            }
            CallOutcome::Completed => StateUpdate::Stop,
            CallOutcome::Interrupted => StateUpdate::Interrupted,
            CallOutcome::Failed => StateUpdate::Error,
        };
        self.state = update.target();
        tracing::debug!(state = ?self.state, "lifecycle: {update}");
        Some(update)
    }
}
