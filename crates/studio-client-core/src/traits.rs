//! Core traits for transport and input collection.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Map, Value};
use thiserror::Error;

use crate::{ArgSpec, Checkpoint, InitData};

/// Streamed response body.
pub type ByteStream = futures::stream::BoxStream<'static, Result<Bytes, TransportError>>;

/// Transport error.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// Non-success HTTP status; displays the status text.
    ///
    /// `status_text` is the canonical reason for the code, not a custom
    /// reason phrase the server may have sent.
    #[error("{status_text}")]
    Status { status: u16, status_text: String },
    #[error("Request failed: {0}")]
    Request(String),
    #[error("Invalid response body: {0}")]
    Body(String),
    #[error("Invalid URL: {0}")]
    Url(String),
}

/// A stream call against a run.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRequest {
    /// Start the run with submitted form values.
    Start {
        run_id: String,
        thread_id: Option<String>,
        inputs: Map<String, Value>,
    },
    /// Resume the run from a checkpoint.
    Resume {
        run_id: String,
        thread_id: Option<String>,
        checkpoint: Checkpoint,
    },
}

impl StreamRequest {
    /// Run the request targets.
    #[must_use]
    pub fn run_id(&self) -> &str {
        match self {
            Self::Start { run_id, .. } | Self::Resume { run_id, .. } => run_id,
        }
    }

    /// Query parameters, in wire order.
    ///
    /// `thread` is omitted while no thread is known, and `checkpoint` while
    /// the checkpoint carries no server id.
    #[must_use]
    pub fn query_pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::with_capacity(4);
        match self {
            Self::Start { thread_id, .. } => {
                if let Some(thread) = thread_id {
                    pairs.push(("thread", thread.clone()));
                }
            }
            Self::Resume {
                thread_id,
                checkpoint,
                ..
            } => {
                if let Some(thread) = thread_id {
                    pairs.push(("thread", thread.clone()));
                }
                pairs.push(("resume", "true".to_owned()));
                pairs.push(("node", checkpoint.node.clone()));
                if let Some(id) = &checkpoint.checkpoint {
                    pairs.push(("checkpoint", id.clone()));
                }
            }
        }
        pairs
    }

    /// JSON request body.
    #[must_use]
    pub fn body(&self) -> Value {
        match self {
            Self::Start { inputs, .. } => Value::Object(inputs.clone()),
            Self::Resume { checkpoint, .. } => checkpoint.data.clone(),
        }
    }

    /// Whether this is a resume call.
    #[must_use]
    pub const fn is_resume(&self) -> bool {
        matches!(self, Self::Resume { .. })
    }
}

/// Trait for the network side of an execution session.
///
/// Implementations must include credentials (cookies) on every call.
#[async_trait]
pub trait Transport: Send + Sync {
    /// `GET {base}/init{query}`.
    async fn fetch_init(&self, query: &str) -> Result<InitData, TransportError>;

    /// `POST {base}/stream/{run_id}` and hand back the response body.
    ///
    /// A non-success status must be returned as [`TransportError::Status`]
    /// before any body is read.
    async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, TransportError>;
}

/// Trait for supplying form values on demand.
///
/// Implement this to integrate with your input UI.
#[async_trait]
pub trait InputSource: Send + Sync {
    /// Value for one argument, or `None` if the user left it empty.
    async fn value_for(&self, arg: &ArgSpec) -> Option<Value>;
}

#[async_trait]
impl InputSource for Map<String, Value> {
    async fn value_for(&self, arg: &ArgSpec) -> Option<Value> {
        self.get(&arg.name).cloned()
    }
}
