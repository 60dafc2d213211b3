use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::execution::Execution;

/// Metadata envelope attached to every execution event.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EventMeta {
    pub version: u16,
    pub correlation_id: Uuid,
    pub idempotency_key: String,
    pub entity_id: String,
    pub timestamp: DateTime<Utc>,
}

impl EventMeta {
    pub fn new(
        entity_id: impl Into<String>,
        correlation_id: Option<Uuid>,
        idempotency_key: impl Into<String>,
    ) -> Self {
        Self {
            version: 1,
            correlation_id: correlation_id.unwrap_or_else(Uuid::now_v7),
            idempotency_key: idempotency_key.into(),
            entity_id: entity_id.into(),
            timestamp: Utc::now(),
        }
    }
}

/// Lifecycle notification emitted when an execution ends.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EventType {
    EndTestSuccess,
    EndTestFailed,
    EndTestAborted,
    EndTestTimeout,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::EndTestSuccess => "end-test-success",
            EventType::EndTestFailed => "end-test-failed",
            EventType::EndTestAborted => "end-test-aborted",
            EventType::EndTestTimeout => "end-test-timeout",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionEvent {
    pub meta: EventMeta,
    pub event_type: EventType,
    pub execution: Execution,
}

impl ExecutionEvent {
    pub fn new(event_type: EventType, execution: &Execution) -> Self {
        Self {
            meta: EventMeta::new(
                execution.id.clone(),
                None,
                format!("{}:{}", execution.id, event_type.as_str()),
            ),
            event_type,
            execution: execution.clone(),
        }
    }
}

/// Fire-and-forget delivery of execution events.
///
/// Implementations must not block; delivery failures are theirs to log.
pub trait EventEmitter: Send + Sync {
    fn notify(&self, event: ExecutionEvent);
}

/// In-process event bus using a tokio broadcast channel.
///
/// Events are broadcast to every active subscriber; a subscriber that falls
/// behind receives `RecvError::Lagged` but never blocks the publisher.
/// Without subscribers events are dropped.
pub struct InProcEventBus {
    sender: broadcast::Sender<ExecutionEvent>,
    capacity: usize,
}

impl std::fmt::Debug for InProcEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcEventBus")
            .field("capacity", &self.capacity)
            .field("subscribers", &self.sender.receiver_count())
            .finish()
    }
}

impl InProcEventBus {
    /// Create a bus buffering up to `capacity` events per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender, capacity }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Subscribe to events published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }
}

impl EventEmitter for InProcEventBus {
    fn notify(&self, event: ExecutionEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("execution event dropped, no subscribers");
        }
    }
}
