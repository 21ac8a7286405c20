//! Execution session: run, thread and checkpoint identity.

use serde_json::{Map, Value};
use studio_client_core::{
    ArgSpec, ByteStream, Checkpoint, InitData, InputSource, JsonStream, Notification, Run,
    StreamRequest, Transport,
};

use crate::ExecutorError;

/// Owns the identity of one run and issues its network calls.
///
/// Only this type mutates the run, thread and checkpoint.
pub struct ExecutionSession<T> {
    transport: T,
    run: Option<Run>,
    thread_id: Option<String>,
    checkpoint: Option<Checkpoint>,
}

impl<T: Transport> ExecutionSession<T> {
    /// Create an uninitialized session.
    #[must_use]
    pub const fn new(transport: T) -> Self {
        Self {
            transport,
            run: None,
            thread_id: None,
            checkpoint: None,
        }
    }

    /// The initialized run, if any.
    #[must_use]
    pub const fn run(&self) -> Option<&Run> {
        self.run.as_ref()
    }

    /// Current thread id.
    #[must_use]
    pub fn thread_id(&self) -> Option<&str> {
        self.thread_id.as_deref()
    }

    /// Pending checkpoint.
    #[must_use]
    pub const fn checkpoint(&self) -> Option<&Checkpoint> {
        self.checkpoint.as_ref()
    }

    /// Whether a resume call can be built.
    #[must_use]
    pub const fn is_resumable(&self) -> bool {
        self.checkpoint.is_some()
    }

    /// The underlying transport.
    #[must_use]
    pub const fn transport(&self) -> &T {
        &self.transport
    }

    /// Fetch init data and install the run.
    ///
    /// On failure the previous run, if any, is discarded.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Initialization`] if the init call fails.
    pub async fn initialize(&mut self, query: &str) -> Result<InitData, ExecutorError> {
        let data = match self.transport.fetch_init(query).await {
            Ok(data) => data,
            Err(e) => {
                self.run = None;
                return Err(ExecutorError::Initialization(e));
            }
        };

        self.run = Some(Run::from(&data));
        if self.thread_id.is_none() {
            if let Some(thread) = data.threads.first() {
                tracing::debug!(thread = thread.id(), "adopting default thread");
                self.thread_id = Some(thread.id().to_owned());
            }
        }
        tracing::debug!(run = %data.id, args = data.args.len(), "run initialized");
        Ok(data)
    }

    /// Build a start request from form values.
    ///
    /// # Errors
    /// Returns [`ExecutorError::NotInitialized`] before a successful initialize.
    pub fn start_request(&self, inputs: Map<String, Value>) -> Result<StreamRequest, ExecutorError> {
        let run = self.run.as_ref().ok_or(ExecutorError::NotInitialized)?;
        Ok(StreamRequest::Start {
            run_id: run.id.clone(),
            thread_id: self.thread_id.clone(),
            inputs,
        })
    }

    /// Build a resume request, consuming the pending checkpoint.
    ///
    /// # Errors
    /// Returns [`ExecutorError::NotInitialized`] or [`ExecutorError::NoCheckpoint`];
    /// neither consumes anything.
    pub fn take_resume_request(&mut self) -> Result<StreamRequest, ExecutorError> {
        let run_id = self
            .run
            .as_ref()
            .map(|run| run.id.clone())
            .ok_or(ExecutorError::NotInitialized)?;
        let checkpoint = self.checkpoint.take().ok_or(ExecutorError::NoCheckpoint)?;
        tracing::debug!(node = %checkpoint.node, "checkpoint consumed");
        Ok(StreamRequest::Resume {
            run_id,
            thread_id: self.thread_id.clone(),
            checkpoint,
        })
    }

    /// Send a stream request and wrap its body in a decoder.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Request`] if the call fails or is refused.
    pub async fn open(
        &self,
        request: &StreamRequest,
    ) -> Result<JsonStream<ByteStream>, ExecutorError> {
        let body = self.transport.open_stream(request).await?;
        Ok(JsonStream::new(body))
    }

    /// A new thread replaces the old one and invalidates any checkpoint.
    pub fn on_thread_update(&mut self, thread_id: String) {
        tracing::debug!(thread = %thread_id, "thread updated");
        self.thread_id = Some(thread_id);
        self.checkpoint = None;
    }

    /// Replace the pending checkpoint.
    pub fn on_node_update(&mut self, checkpoint: Checkpoint) {
        tracing::debug!(node = %checkpoint.node, "node updated");
        self.checkpoint = Some(checkpoint);
    }

    /// Apply an inbound notification.
    pub fn apply(&mut self, notification: Notification) {
        match notification {
            Notification::ThreadUpdated(thread_id) => self.on_thread_update(thread_id),
            Notification::NodeUpdated(checkpoint) => self.on_node_update(checkpoint),
        }
    }
}

/// Collect form values for `args` from an input source.
///
/// Only `STRING` and `IMAGE` args are asked for; empty optional args are
/// left out of the map.
///
/// # Errors
/// Returns [`ExecutorError::MissingArgument`] for an empty required arg.
pub async fn collect_inputs(
    args: &[ArgSpec],
    source: &dyn InputSource,
) -> Result<Map<String, Value>, ExecutorError> {
    let mut inputs = Map::new();
    for arg in args.iter().filter(|arg| arg.arg_type.is_collected()) {
        match source.value_for(arg).await {
            Some(value) => {
                inputs.insert(arg.name.clone(), value);
            }
            None if arg.required => return Err(ExecutorError::MissingArgument(arg.name.clone())),
            None => {}
        }
    }
    Ok(inputs)
}
