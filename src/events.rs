use crate::error::EventBusError;
use crate::finalizer::RecordSummary;
use crate::session::{SessionId, SurfaceKind};
use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Notifications emitted by the recorder to interested observers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecorderEvent {
    /// All enabled surfaces started and the session is Active
    RecordingStarted {
        session_id: SessionId,
        target_context_id: String,
        timestamp: SystemTime,
    },
    /// A surface failed while the session was Active
    SurfaceFailed {
        session_id: SessionId,
        surface: SurfaceKind,
        reason: String,
    },
    /// A session finished finalizing and the recorder is Idle again
    RecordingStopped {
        session_id: SessionId,
        error: Option<String>,
        summary: RecordSummary,
        persisted: bool,
    },
    /// The review view should be opened for a persisted session
    ReviewRequested { session_id: SessionId },
    /// A persisted recording was removed from storage
    RecordingDeleted { session_id: SessionId },
}

impl RecorderEvent {
    pub fn session_id(&self) -> SessionId {
        match self {
            RecorderEvent::RecordingStarted { session_id, .. }
            | RecorderEvent::SurfaceFailed { session_id, .. }
            | RecorderEvent::RecordingStopped { session_id, .. }
            | RecorderEvent::ReviewRequested { session_id }
            | RecorderEvent::RecordingDeleted { session_id } => *session_id,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            RecorderEvent::RecordingStarted {
                session_id,
                target_context_id,
                ..
            } => format!("Recording {} started on {}", session_id, target_context_id),
            RecorderEvent::SurfaceFailed {
                surface, reason, ..
            } => format!("Surface {} failed: {}", surface, reason),
            RecorderEvent::RecordingStopped {
                session_id,
                error,
                persisted,
                ..
            } => match error {
                Some(error) => format!(
                    "Recording {} stopped with error: {} (persisted: {})",
                    session_id, error, persisted
                ),
                None => format!("Recording {} stopped (persisted: {})", session_id, persisted),
            },
            RecorderEvent::ReviewRequested { session_id } => {
                format!("Review requested for {}", session_id)
            }
            RecorderEvent::RecordingDeleted { session_id } => {
                format!("Recording {} deleted", session_id)
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            RecorderEvent::RecordingStarted { .. } => "recording_started",
            RecorderEvent::SurfaceFailed { .. } => "surface_failed",
            RecorderEvent::RecordingStopped { .. } => "recording_stopped",
            RecorderEvent::ReviewRequested { .. } => "review_requested",
            RecorderEvent::RecordingDeleted { .. } => "recording_deleted",
        }
    }
}

/// Async event bus for recorder notifications using broadcast channels
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<RecorderEvent>,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RecorderEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all subscribers
    pub async fn publish(&self, event: RecorderEvent) -> Result<usize, EventBusError> {
        match &event {
            RecorderEvent::SurfaceFailed {
                surface, reason, ..
            } => {
                warn!("Capture surface {} failed: {}", surface, reason);
            }
            RecorderEvent::RecordingStopped { .. } => {
                info!("{}", event.description());
            }
            _ => debug!("Publishing event: {}", event.description()),
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    All,
    EventTypes(Vec<&'static str>),
    /// Accept only events belonging to one session
    Session(SessionId),
}

impl EventFilter {
    pub fn matches(&self, event: &RecorderEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::Session(id) => event.session_id() == *id,
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<RecorderEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<RecorderEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<RecorderEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<RecorderEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::Lagged { skipped: n });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}
