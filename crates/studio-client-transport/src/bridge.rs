//! Notification bridge between an upstream update source and a controller.

use studio_client_core::{Checkpoint, Notification, StreamEvent, Termination};
use tokio::sync::mpsc;

use crate::protocol::UpdateMessage;

/// Send error.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("Channel closed")]
    ChannelClosed,
    #[error("Invalid message: {0}")]
    InvalidMessage(#[from] serde_json::Error),
}

/// Upstream side of the notification channel.
///
/// Hand the receiver to `ExecutorController::attach_notifications`.
pub struct NotificationBridge {
    tx: mpsc::UnboundedSender<Notification>,
    last_thread: Option<String>,
}

impl NotificationBridge {
    /// Create a bridge and the receiver for the controller side.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                tx,
                last_thread: None,
            },
            rx,
        )
    }

    /// Record the thread the controller already uses, so observing results
    /// on it does not announce it again.
    #[must_use]
    pub fn with_thread(mut self, thread_id: impl Into<String>) -> Self {
        self.last_thread = Some(thread_id.into());
        self
    }

    /// Send a notification.
    ///
    /// # Errors
    /// Returns error if the controller side was dropped.
    pub fn send(&mut self, notification: Notification) -> Result<(), SendError> {
        if let Notification::ThreadUpdated(thread_id) = &notification {
            self.last_thread = Some(thread_id.clone());
        }
        self.tx
            .send(notification)
            .map_err(|_| SendError::ChannelClosed)
    }

    /// Parse a wire message and send it.
    ///
    /// # Errors
    /// Returns error if the text is not a known message or the channel is closed.
    pub fn send_message(&mut self, text: &str) -> Result<(), SendError> {
        let message = UpdateMessage::parse(text)?;
        self.send(message.into())
    }

    /// Announce the thread a result was produced on, if it changed.
    ///
    /// Results are `[threadId, nodeOutput]` tuples; anything else is ignored.
    ///
    /// # Errors
    /// Returns error if the channel is closed.
    pub fn observe_result(&mut self, event: &StreamEvent) -> Result<(), SendError> {
        let Some(thread_id) = event.payload().and_then(|p| p.as_str()) else {
            return Ok(());
        };
        if self.last_thread.as_deref() == Some(thread_id) {
            return Ok(());
        }
        self.send(Notification::ThreadUpdated(thread_id.to_owned()))
    }

    /// Observe the last value of a call, announcing its checkpoint if the run
    /// paused.
    ///
    /// The checkpoint's resume data is the node output's `state`.
    ///
    /// # Errors
    /// Returns error if the channel is closed.
    pub fn observe_final(&mut self, event: &StreamEvent) -> Result<(), SendError> {
        self.observe_result(event)?;
        if !matches!(event.termination(), Some(Termination::Interrupted { .. })) {
            return Ok(());
        }
        let Some(output) = event.node_output() else {
            return Ok(());
        };
        self.send(Notification::NodeUpdated(Checkpoint {
            node: output.node,
            data: output.state,
            checkpoint: output.checkpoint,
        }))
    }
}
