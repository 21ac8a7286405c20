//! Executor error.

use studio_client_core::TransportError;

/// Error from initialize, start or resume.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ExecutorError {
    #[error("{0}")]
    Initialization(TransportError),
    #[error("Run is not initialized")]
    NotInitialized,
    #[error("No checkpoint to resume from")]
    NoCheckpoint,
    #[error("Missing required argument: {0}")]
    MissingArgument(String),
    #[error(transparent)]
    Request(#[from] TransportError),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
}

impl ExecutorError {
    /// Whether the error was raised before any network attempt.
    #[must_use]
    pub const fn is_precondition(&self) -> bool {
        matches!(
            self,
            Self::NotInitialized | Self::NoCheckpoint | Self::MissingArgument(_)
        )
    }
}
