//! Controller wiring the execution session to the lifecycle and event bus.

use std::sync::Arc;

use futures::{StreamExt, future::Either};
use serde_json::{Map, Value};
use studio_client_core::{
    Checkpoint, ClientConfig, EventBus, ExecutionState, InputSource, Notification, Run,
    StreamEvent, StreamRequest, Transport,
};
use tokio::sync::mpsc;

use crate::{
    ExecutorError,
    lifecycle::{CallOutcome, Lifecycle},
    session::{ExecutionSession, collect_inputs},
};

/// Drives start and resume calls for one run.
///
/// Start and resume take `&mut self`, so at most one call is in flight per
/// controller. Dropping the future of an in-flight call abandons its stream.
pub struct ExecutorController<T> {
    session: ExecutionSession<T>,
    lifecycle: Lifecycle,
    events: Arc<EventBus>,
    inbound: Option<mpsc::UnboundedReceiver<Notification>>,
    query: String,
}

impl<T: Transport> ExecutorController<T> {
    /// Create a controller from configuration.
    #[must_use]
    pub fn new(transport: T, config: &ClientConfig) -> Self {
        let events = Arc::new(EventBus::with_limits(
            config.event_capacity,
            config.history_limit,
        ));
        Self::with_event_bus(transport, config.query.clone(), events)
    }

    /// Create a controller publishing to an existing bus.
    #[must_use]
    pub fn with_event_bus(transport: T, query: impl Into<String>, events: Arc<EventBus>) -> Self {
        Self {
            session: ExecutionSession::new(transport),
            lifecycle: Lifecycle::new(),
            events,
            inbound: None,
            query: query.into(),
        }
    }

    /// Outbound event bus.
    #[must_use]
    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Read-only view of the session.
    #[must_use]
    pub const fn session(&self) -> &ExecutionSession<T> {
        &self.session
    }

    /// Current lifecycle state.
    #[must_use]
    pub const fn state(&self) -> ExecutionState {
        self.lifecycle.state()
    }

    /// Whether a call is in flight.
    #[must_use]
    pub const fn is_executing(&self) -> bool {
        self.lifecycle.is_executing()
    }

    /// Whether submit is currently available.
    #[must_use]
    pub const fn can_submit(&self) -> bool {
        self.session.run().is_some() && !self.is_executing()
    }

    /// Whether resume is currently available.
    #[must_use]
    pub const fn can_resume(&self) -> bool {
        self.session.run().is_some() && self.session.is_resumable() && !self.is_executing()
    }

    /// Pending checkpoint, if resume is possible.
    #[must_use]
    pub const fn checkpoint(&self) -> Option<&Checkpoint> {
        self.session.checkpoint()
    }

    /// Attach the single upstream notification source.
    ///
    /// Replaces any previously attached receiver.
    pub fn attach_notifications(&mut self, rx: mpsc::UnboundedReceiver<Notification>) {
        self.inbound = Some(rx);
    }

    /// Create a notification channel and attach its receiver.
    pub fn notification_sender(&mut self) -> mpsc::UnboundedSender<Notification> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.attach_notifications(rx);
        tx
    }

    /// Apply a notification directly.
    pub fn apply(&mut self, notification: Notification) {
        self.session.apply(notification);
    }

    /// Apply every notification already waiting on the attached receiver.
    ///
    /// Returns the number applied.
    pub fn apply_pending_notifications(&mut self) -> usize {
        let Some(rx) = self.inbound.as_mut() else {
            return 0;
        };
        let mut applied = 0;
        loop {
            match rx.try_recv() {
                Ok(notification) => {
                    self.session.apply(notification);
                    applied += 1;
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    tracing::debug!("notification source closed");
                    self.inbound = None;
                    break;
                }
            }
        }
        applied
    }

    /// Fetch init data and publish it as `init`.
    ///
    /// A failure is published as an `error` message; submit and resume stay
    /// unavailable until a later initialize succeeds.
    ///
    /// # Errors
    /// Returns [`ExecutorError::Initialization`] if the init call fails.
    pub async fn initialize(&mut self) -> Result<Run, ExecutorError> {
        match self.session.initialize(&self.query).await {
            Ok(data) => {
                let run = Run::from(&data);
                self.events.publish_init(data);
                Ok(run)
            }
            Err(e) => {
                tracing::error!(error = %e, "initialization failed");
                self.events.publish_error(e.to_string());
                Err(e)
            }
        }
    }

    /// Start the run with form values.
    ///
    /// Returns the last decoded value, or `None` if the stream was empty.
    ///
    /// # Errors
    /// Returns [`ExecutorError::NotInitialized`] without any transition, or
    /// the error that ended the call in `Errored`.
    pub async fn submit(
        &mut self,
        inputs: Map<String, Value>,
    ) -> Result<Option<StreamEvent>, ExecutorError> {
        self.apply_pending_notifications();
        let request = self.session.start_request(inputs)?;
        self.execute(request).await
    }

    /// Start the run with values collected from an input source.
    ///
    /// # Errors
    /// Returns [`ExecutorError::MissingArgument`] without any transition,
    /// otherwise as [`Self::submit`].
    pub async fn submit_from(
        &mut self,
        source: &dyn InputSource,
    ) -> Result<Option<StreamEvent>, ExecutorError> {
        let args = self
            .session
            .run()
            .map(|run| run.args.clone())
            .ok_or(ExecutorError::NotInitialized)?;
        let inputs = collect_inputs(&args, source).await?;
        self.submit(inputs).await
    }

    /// Resume from the pending checkpoint, consuming it.
    ///
    /// # Errors
    /// Returns [`ExecutorError::NoCheckpoint`] without any transition, or the
    /// error that ended the call in `Errored`.
    pub async fn resume(&mut self) -> Result<Option<StreamEvent>, ExecutorError> {
        self.apply_pending_notifications();
        let request = self.session.take_resume_request()?;
        self.execute(request).await
    }

    async fn execute(
        &mut self,
        request: StreamRequest,
    ) -> Result<Option<StreamEvent>, ExecutorError> {
        let update = self.lifecycle.begin();
        self.events.publish_state(update);

        let result = self.drain(&request).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, resume = request.is_resume(), "stream call failed");
            self.events.publish_error(e.to_string());
        }

        if let Some(update) = self.lifecycle.finish(CallOutcome::from_result(&result)) {
            self.events.publish_state(update);
        }
        result
    }

    async fn drain(&mut self, request: &StreamRequest) -> Result<Option<StreamEvent>, ExecutorError> {
        let mut stream = self.session.open(request).await?;
        let mut last = None;

        loop {
            let next = if let Some(rx) = self.inbound.as_mut() {
                tokio::select! {
                    notification = rx.recv() => Either::Left(notification),
                    item = stream.next() => Either::Right(item),
                }
            } else {
                Either::Right(stream.next().await)
            };
            let next = match next {
                Either::Right(item) => item,
                Either::Left(Some(notification)) => {
                    self.session.apply(notification);
                    continue;
                }
                Either::Left(None) => {
                    self.inbound = None;
                    continue;
                }
            };

            match next {
                Some(Ok(value)) => {
                    let event = StreamEvent::new(value);
                    tracing::debug!(node = ?event.node(), "stream result");
                    self.events.publish_result(event.clone());
                    last = Some(event);
                }
                Some(Err(e)) => return Err(e.into()),
                None => break,
            }
        }

        self.apply_pending_notifications();

        match last {
            Some(event) if event.termination().is_none() => Err(ExecutorError::MalformedResponse(
                "stream ended without a terminal event".into(),
            )),
            last => Ok(last),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
    };

    use async_trait::async_trait;
    use bytes::Bytes;
    use serde_json::json;
    use studio_client_core::{
        ArgSpec, ArgType, ByteStream, ExecutorEvent, InitData, StateUpdate, ThreadEntry,
        TransportError,
    };

    use super::*;

    type Script = Result<Vec<Result<Bytes, TransportError>>, TransportError>;

    #[derive(Clone, Default)]
    struct ScriptedTransport {
        init: Arc<Mutex<Option<Result<InitData, TransportError>>>>,
        streams: Arc<Mutex<VecDeque<Script>>>,
        requests: Arc<Mutex<Vec<StreamRequest>>>,
    }

    impl ScriptedTransport {
        fn with_init(data: InitData) -> Self {
            let transport = Self::default();
            *transport.init.lock().unwrap() = Some(Ok(data));
            transport
        }

        fn push_chunks(&self, chunks: &[&str]) {
            let chunks = chunks
                .iter()
                .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
                .collect();
            self.streams.lock().unwrap().push_back(Ok(chunks));
        }

        fn push_script(&self, script: Script) {
            self.streams.lock().unwrap().push_back(script);
        }

        fn requests(&self) -> Vec<StreamRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn fetch_init(&self, _query: &str) -> Result<InitData, TransportError> {
            self.init
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Err(TransportError::Request("no init scripted".into())))
        }

        async fn open_stream(&self, request: &StreamRequest) -> Result<ByteStream, TransportError> {
            self.requests.lock().unwrap().push(request.clone());
            let script = self
                .streams
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(TransportError::Request("no stream scripted".into())))?;
            Ok(futures::stream::iter(script).boxed())
        }
    }

    fn init_data() -> InitData {
        InitData {
            id: "r1".into(),
            title: Some("Test".into()),
            graph: None,
            args: vec![ArgSpec::new("prompt", ArgType::String).required()],
            threads: vec![ThreadEntry("t1".into(), vec![])],
        }
    }

    async fn ready_controller() -> (ExecutorController<ScriptedTransport>, ScriptedTransport) {
        let transport = ScriptedTransport::with_init(init_data());
        let mut controller = ExecutorController::new(transport.clone(), &ClientConfig::default());
        controller.initialize().await.unwrap();
        (controller, transport)
    }

    fn prompt(text: &str) -> Map<String, Value> {
        let mut inputs = Map::new();
        inputs.insert("prompt".into(), json!(text));
        inputs
    }

    fn state_updates(events: &[ExecutorEvent]) -> Vec<StateUpdate> {
        events
            .iter()
            .filter_map(|e| match e {
                ExecutorEvent::StateUpdated(update) => Some(*update),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_submit_publishes_every_result_in_order() {
        let (mut controller, transport) = ready_controller().await;
        transport.push_chunks(&[r#"{"a":1}"#, r#"[{"x":2},{"node":"__END__"}]"#]);

        let last = controller.submit(prompt("hi")).await.unwrap();
        assert_eq!(last, Some(StreamEvent::new(json!([{"x": 2}, {"node": "__END__"}]))));
        assert_eq!(controller.state(), ExecutionState::Stopped);

        let history = controller.events().history();
        assert!(matches!(history[0], ExecutorEvent::Init(_)));
        assert_eq!(
            history[1..],
            [
                ExecutorEvent::StateUpdated(StateUpdate::Start),
                ExecutorEvent::Result(StreamEvent::new(json!({"a": 1}))),
                ExecutorEvent::Result(StreamEvent::new(json!([{"x": 2}, {"node": "__END__"}]))),
                ExecutorEvent::StateUpdated(StateUpdate::Stop),
            ]
        );
        assert_eq!(
            transport.requests(),
            vec![StreamRequest::Start {
                run_id: "r1".into(),
                thread_id: Some("t1".into()),
                inputs: prompt("hi"),
            }]
        );
    }

    #[tokio::test]
    async fn test_executing_cleared_before_terminal_update_is_seen() {
        let (mut controller, transport) = ready_controller().await;
        transport.push_chunks(&[r#"[{},{"node":"__END__"}]"#]);
        let mut rx = controller.events().subscribe();

        controller.submit(prompt("hi")).await.unwrap();
        assert!(!controller.is_executing());
        assert_eq!(
            rx.recv().await.unwrap(),
            ExecutorEvent::StateUpdated(StateUpdate::Start)
        );
        rx.recv().await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            ExecutorEvent::StateUpdated(StateUpdate::Stop)
        );
    }

    #[tokio::test]
    async fn test_interrupt_then_resume_once() {
        let (mut controller, transport) = ready_controller().await;
        let tx = controller.notification_sender();
        transport.push_chunks(&[r#"[{"y":1},{"node":"wait_for_input"}]"#]);

        controller.submit(prompt("hi")).await.unwrap();
        assert_eq!(controller.state(), ExecutionState::Interrupted);
        assert!(!controller.can_resume());

        tx.send(Notification::NodeUpdated(
            Checkpoint::new("wait_for_input", json!({"y": 1})).with_checkpoint_id("cp-1"),
        ))
        .unwrap();
        controller.apply_pending_notifications();
        assert!(controller.can_resume());
        assert_eq!(controller.checkpoint().unwrap().node, "wait_for_input");

        transport.push_chunks(&[r#"[{"y":2},{"node":"__END__"}]"#]);
        controller.resume().await.unwrap();
        assert_eq!(controller.state(), ExecutionState::Stopped);
        assert!(!controller.can_resume());

        let updates_before = state_updates(&controller.events().history()).len();
        assert_eq!(controller.resume().await.unwrap_err(), ExecutorError::NoCheckpoint);
        assert_eq!(state_updates(&controller.events().history()).len(), updates_before);
        assert_eq!(controller.state(), ExecutionState::Stopped);

        let requests = transport.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].body(), json!({"y": 1}));
        assert!(requests[1].is_resume());
    }

    #[tokio::test]
    async fn test_notification_during_stream_is_applied() {
        let (mut controller, transport) = ready_controller().await;
        let tx = controller.notification_sender();
        tx.send(Notification::NodeUpdated(Checkpoint::new("review", json!(null))))
            .unwrap();
        transport.push_chunks(&[r#"[{},{"node":"review"}]"#]);

        controller.submit(prompt("hi")).await.unwrap();
        assert!(controller.can_resume());
    }

    #[tokio::test]
    async fn test_queued_thread_update_applies_before_submit() {
        let (mut controller, transport) = ready_controller().await;
        let tx = controller.notification_sender();
        tx.send(Notification::ThreadUpdated("t2".into())).unwrap();
        transport.push_chunks(&[r#"[{},{"node":"__END__"}]"#]);

        controller.submit(prompt("hi")).await.unwrap();
        let requests = transport.requests();
        assert_eq!(requests[0].query_pairs(), vec![("thread", "t2".to_owned())]);
    }

    #[tokio::test]
    async fn test_tuple_with_unnamed_node_interrupts() {
        let (mut controller, transport) = ready_controller().await;
        transport.push_chunks(&[r#"[{"y":1},{"node":7}]"#]);
        transport.push_chunks(&[r#"[{"y":1},{}]"#]);

        controller.submit(prompt("hi")).await.unwrap();
        assert_eq!(controller.state(), ExecutionState::Interrupted);
        controller.submit(prompt("hi")).await.unwrap();
        assert_eq!(controller.state(), ExecutionState::Interrupted);
        assert_eq!(
            state_updates(&controller.events().history()),
            vec![
                StateUpdate::Start,
                StateUpdate::Interrupted,
                StateUpdate::Start,
                StateUpdate::Interrupted,
            ]
        );
    }

    #[tokio::test]
    async fn test_thread_update_invalidates_checkpoint() {
        let (mut controller, _transport) = ready_controller().await;
        controller.apply(Notification::NodeUpdated(Checkpoint::new("wait", json!({}))));
        assert!(controller.can_resume());

        controller.apply(Notification::ThreadUpdated("t2".into()));
        assert!(!controller.can_resume());
        assert_eq!(controller.session().thread_id(), Some("t2"));
    }

    #[tokio::test]
    async fn test_status_error_ends_errored() {
        let (mut controller, transport) = ready_controller().await;
        transport.push_script(Err(TransportError::Status {
            status: 404,
            status_text: "Not Found".into(),
        }));

        let err = controller.submit(prompt("hi")).await.unwrap_err();
        assert_eq!(err.to_string(), "Not Found");
        assert_eq!(controller.state(), ExecutionState::Errored);
        assert!(controller.can_submit());

        let history = controller.events().history();
        let tail = &history[history.len() - 2..];
        assert_eq!(
            tail,
            [
                ExecutorEvent::Error("Not Found".into()),
                ExecutorEvent::StateUpdated(StateUpdate::Error),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_resume_does_not_restore_checkpoint() {
        let (mut controller, transport) = ready_controller().await;
        controller.apply(Notification::NodeUpdated(Checkpoint::new("wait", json!({}))));
        transport.push_script(Err(TransportError::Request("connection refused".into())));

        assert!(controller.resume().await.is_err());
        assert_eq!(controller.state(), ExecutionState::Errored);
        assert!(!controller.can_resume());
    }

    #[tokio::test]
    async fn test_body_error_after_results() {
        let (mut controller, transport) = ready_controller().await;
        transport.push_script(Ok(vec![
            Ok(Bytes::from_static(br#"{"a":1}"#)),
            Err(TransportError::Request("connection reset".into())),
        ]));

        let err = controller.submit(prompt("hi")).await.unwrap_err();
        assert_eq!(err, ExecutorError::Request(TransportError::Request("connection reset".into())));
        assert_eq!(controller.state(), ExecutionState::Errored);

        let results = controller
            .events()
            .history()
            .into_iter()
            .filter(|e| matches!(e, ExecutorEvent::Result(_)))
            .count();
        assert_eq!(results, 1);
    }

    #[tokio::test]
    async fn test_non_terminal_last_value_is_malformed() {
        let (mut controller, transport) = ready_controller().await;
        transport.push_chunks(&[r#"{"a":1}"#]);

        let err = controller.submit(prompt("hi")).await.unwrap_err();
        assert!(matches!(err, ExecutorError::MalformedResponse(_)));
        assert_eq!(controller.state(), ExecutionState::Errored);
    }

    #[tokio::test]
    async fn test_empty_stream_returns_to_idle() {
        let (mut controller, transport) = ready_controller().await;
        transport.push_chunks(&["\n"]);

        assert_eq!(controller.submit(prompt("hi")).await.unwrap(), None);
        assert_eq!(controller.state(), ExecutionState::Idle);
        assert!(!controller.is_executing());
        assert_eq!(
            state_updates(&controller.events().history()),
            vec![StateUpdate::Start]
        );
    }

    #[tokio::test]
    async fn test_failed_init_blocks_submit_and_resume() {
        let transport = ScriptedTransport::default();
        *transport.init.lock().unwrap() = Some(Err(TransportError::Status {
            status: 500,
            status_text: "Internal Server Error".into(),
        }));
        let mut controller = ExecutorController::new(transport.clone(), &ClientConfig::default());

        let err = controller.initialize().await.unwrap_err();
        assert!(matches!(err, ExecutorError::Initialization(_)));
        assert_eq!(
            controller.events().history(),
            vec![ExecutorEvent::Error("Internal Server Error".into())]
        );
        assert!(!controller.can_submit());
        assert_eq!(
            controller.submit(prompt("hi")).await.unwrap_err(),
            ExecutorError::NotInitialized
        );
        assert_eq!(controller.resume().await.unwrap_err(), ExecutorError::NotInitialized);
        assert!(transport.requests().is_empty());
        assert_eq!(controller.state(), ExecutionState::Idle);
    }

    #[tokio::test]
    async fn test_submit_from_missing_required_arg() {
        let (mut controller, transport) = ready_controller().await;

        let err = controller.submit_from(&Map::new()).await.unwrap_err();
        assert_eq!(err, ExecutorError::MissingArgument("prompt".into()));
        assert!(err.is_precondition());
        assert!(transport.requests().is_empty());
        assert_eq!(controller.state(), ExecutionState::Idle);
    }
}
