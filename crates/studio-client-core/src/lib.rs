//! Core abstractions for driving checkpointed studio runs.
//!
//! This crate provides the fundamental building blocks:
//! - `JsonStream` - Incremental JSON framing over a streamed body
//! - `EventBus` - Broadcast + history for executor events
//! - `InitData`, `Checkpoint`, `StreamEvent` - Wire data model
//! - `Transport` and `InputSource` traits
//! - `ClientConfig` - Endpoint and buffering configuration

pub mod config;
pub mod decoder;
pub mod event_bus;
pub mod state;
pub mod traits;
pub mod types;

pub use config::{ClientConfig, ConfigError};
pub use decoder::JsonStream;
pub use event_bus::{EventBus, ExecutorEvent};
pub use state::{ExecutionState, StateUpdate};
pub use traits::{ByteStream, InputSource, StreamRequest, Transport, TransportError};
pub use types::{
    ArgSpec, ArgType, Checkpoint, END_NODE, InitData, NodeOutput, Notification, Run, StreamEvent,
    Termination, ThreadEntry,
};
