//! Execution session and lifecycle for studio runs.
//!
//! Provides:
//! - `ExecutionSession` - Run, thread and checkpoint identity plus the network calls
//! - `Lifecycle` - The idle/executing/terminal state machine
//! - `ExecutorController` - Wires both to the event bus and inbound notifications

pub mod controller;
pub mod error;
pub mod lifecycle;
pub mod session;

pub use controller::ExecutorController;
pub use error::ExecutorError;
pub use lifecycle::{CallOutcome, Lifecycle};
pub use session::ExecutionSession;
