//! Broadcast + history topic for executor events.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::wrappers::{BroadcastStream, errors::BroadcastStreamRecvError};

use crate::{InitData, StateUpdate, StreamEvent};

/// Default live channel capacity.
pub const DEFAULT_CAPACITY: usize = 1024;

/// Default number of events kept for late subscribers.
pub const DEFAULT_HISTORY_LIMIT: usize = 1024;

/// Notification published by a controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "detail", rename_all = "kebab-case")]
pub enum ExecutorEvent {
    /// Init data received from the server.
    Init(InitData),
    /// One decoded stream value, terminal or not.
    Result(StreamEvent),
    /// Lifecycle transition.
    StateUpdated(StateUpdate),
    /// Display-facing error message.
    Error(String),
}

/// Event topic with broadcast and history support.
///
/// Subscribers that attach late receive the retained history first and then
/// live events, with nothing dropped or repeated in between.
pub struct EventBus {
    history: RwLock<VecDeque<ExecutorEvent>>,
    history_limit: usize,
    sender: broadcast::Sender<ExecutorEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with default limits.
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CAPACITY, DEFAULT_HISTORY_LIMIT)
    }

    /// Create a bus with an explicit channel capacity and history length.
    #[must_use]
    pub fn with_limits(capacity: usize, history_limit: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            history: RwLock::new(VecDeque::with_capacity(history_limit.min(64))),
            history_limit,
            sender,
        }
    }

    /// Publish to history and live subscribers.
    pub fn publish(&self, event: ExecutorEvent) {
        let mut history = self.history.write().unwrap_or_else(PoisonError::into_inner);
        if self.history_limit > 0 {
            while history.len() >= self.history_limit {
                history.pop_front();
            }
            history.push_back(event.clone());
        }
        // No live subscribers is fine.
        let _ = self.sender.send(event);
    }

    /// Publish init data.
    pub fn publish_init(&self, data: InitData) {
        self.publish(ExecutorEvent::Init(data));
    }

    /// Publish a decoded stream value.
    pub fn publish_result(&self, event: StreamEvent) {
        self.publish(ExecutorEvent::Result(event));
    }

    /// Publish a lifecycle transition.
    pub fn publish_state(&self, update: StateUpdate) {
        self.publish(ExecutorEvent::StateUpdated(update));
    }

    /// Publish an error message.
    pub fn publish_error(&self, message: impl Into<String>) {
        self.publish(ExecutorEvent::Error(message.into()));
    }

    /// Get a receiver for live events only.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutorEvent> {
        self.sender.subscribe()
    }

    /// Number of live subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Snapshot of the retained history.
    #[must_use]
    pub fn history(&self) -> Vec<ExecutorEvent> {
        self.history
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live events.
    #[must_use]
    pub fn history_plus_stream(&self) -> futures::stream::BoxStream<'static, ExecutorEvent> {
        let (history, rx) = {
            // Holding the lock keeps publish from slipping between the two.
            let guard = self.history.read().unwrap_or_else(PoisonError::into_inner);
            (guard.iter().cloned().collect::<Vec<_>>(), self.sender.subscribe())
        };

        let live = live_events(rx);
        Box::pin(futures::stream::iter(history).chain(live))
    }

    /// Live `result` values until the next terminal state update.
    #[must_use]
    pub fn result_stream(&self) -> futures::stream::BoxStream<'static, StreamEvent> {
        live_events(self.subscribe())
            .take_while(|event| {
                future::ready(!matches!(event, ExecutorEvent::StateUpdated(update) if update.is_terminal()))
            })
            .filter_map(|event| async move {
                match event {
                    ExecutorEvent::Result(result) => Some(result),
                    _ => None,
                }
            })
            .boxed()
    }
}

fn live_events(
    rx: broadcast::Receiver<ExecutorEvent>,
) -> impl futures::Stream<Item = ExecutorEvent> + Send + 'static {
    BroadcastStream::new(rx).filter_map(|res| async move {
        match res {
            Ok(event) => Some(event),
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "event subscriber lagged");
                None
            }
        }
    })
}
