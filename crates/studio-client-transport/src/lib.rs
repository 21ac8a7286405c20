//! Transport layer for studio runs.
//!
//! Provides:
//! - Inbound notification wire protocol
//! - Notification bridge between an upstream source and a controller
//! - HTTP transport (feature: http)

pub mod bridge;
pub mod protocol;

#[cfg(feature = "http")]
pub mod http;

pub use bridge::{NotificationBridge, SendError};
pub use protocol::UpdateMessage;

#[cfg(feature = "http")]
pub use http::HttpTransport;
