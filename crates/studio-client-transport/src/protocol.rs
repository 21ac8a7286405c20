//! Wire protocol for inbound live-update notifications.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use studio_client_core::{Checkpoint, Notification};

/// Message from the live-update source to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpdateMessage {
    /// The server assigned a thread.
    ThreadUpdated { thread_id: String },
    /// A node paused and can be resumed.
    NodeUpdated {
        node: String,
        #[serde(default)]
        data: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        checkpoint: Option<String>,
    },
}

impl UpdateMessage {
    /// Parse a message from JSON text.
    ///
    /// # Errors
    /// Returns error if the text is not a known message.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize to JSON text.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl From<UpdateMessage> for Notification {
    fn from(message: UpdateMessage) -> Self {
        match message {
            UpdateMessage::ThreadUpdated { thread_id } => Self::ThreadUpdated(thread_id),
            UpdateMessage::NodeUpdated {
                node,
                data,
                checkpoint,
            } => Self::NodeUpdated(Checkpoint {
                node,
                data,
                checkpoint,
            }),
        }
    }
}

impl From<Notification> for UpdateMessage {
    fn from(notification: Notification) -> Self {
        match notification {
            Notification::ThreadUpdated(thread_id) => Self::ThreadUpdated { thread_id },
            Notification::NodeUpdated(Checkpoint {
                node,
                data,
                checkpoint,
            }) => Self::NodeUpdated {
                node,
                data,
                checkpoint,
            },
        }
    }
}
