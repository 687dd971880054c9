use std::time::SystemTime;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::warn;

use crate::error::{RecorderError, Result};
use crate::orchestrator::Command;
use crate::session::{IngestEvent, MediaCapture, SessionId, SurfaceKind};

/// Output produced by a capture surface
#[derive(Debug, Clone, PartialEq)]
pub enum SurfaceEvent {
    Telemetry(IngestEvent),
    MediaReady(MediaCapture),
    MediaError { reason: String },
    Failed { surface: SurfaceKind, reason: String },
}

impl SurfaceEvent {
    pub fn kind(&self) -> SurfaceKind {
        match self {
            SurfaceEvent::Telemetry(event) => event.kind(),
            SurfaceEvent::MediaReady(_) | SurfaceEvent::MediaError { .. } => SurfaceKind::Media,
            SurfaceEvent::Failed { surface, .. } => *surface,
        }
    }
}

/// A surface event stamped with its arrival time and, when known, the
/// session that produced it
#[derive(Debug, Clone)]
pub struct SurfaceMessage {
    pub session_id: Option<SessionId>,
    pub arrived_at: SystemTime,
    pub event: SurfaceEvent,
}

/// Channel back into the orchestrator used by surfaces and host pages
#[derive(Debug, Clone)]
pub struct SurfaceSink {
    commands: mpsc::Sender<Command>,
    session_id: Option<SessionId>,
}

impl SurfaceSink {
    pub(crate) fn new(commands: mpsc::Sender<Command>) -> Self {
        Self {
            commands,
            session_id: None,
        }
    }

    /// A sink whose events are tagged with `session_id`. Events from a
    /// scoped sink are dropped once that session is no longer current.
    pub fn scoped(&self, session_id: SessionId) -> Self {
        Self {
            commands: self.commands.clone(),
            session_id: Some(session_id),
        }
    }

    pub fn session_id(&self) -> Option<SessionId> {
        self.session_id
    }

    /// Queue telemetry without waiting. A full queue drops the event.
    pub fn try_emit(&self, event: SurfaceEvent) -> Result<()> {
        let kind = event.kind();
        match self.commands.try_send(Command::Surface(self.stamp(event))) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("Command queue full, dropping {} event", kind);
                Err(RecorderError::Ingestion {
                    kind: kind.to_string(),
                    message: "command queue full".to_string(),
                })
            }
            Err(TrySendError::Closed(_)) => Err(RecorderError::Channel),
        }
    }

    /// Deliver an event, waiting for queue capacity
    pub async fn emit(&self, event: SurfaceEvent) -> Result<()> {
        self.commands
            .send(Command::Surface(self.stamp(event)))
            .await
            .map_err(|_| RecorderError::Channel)
    }

    fn stamp(&self, event: SurfaceEvent) -> SurfaceMessage {
        SurfaceMessage {
            session_id: self.session_id,
            arrived_at: SystemTime::now(),
            event,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ConsoleLogPayload;

    fn console_event() -> SurfaceEvent {
        SurfaceEvent::Telemetry(IngestEvent::Console(ConsoleLogPayload {
            level: "log".to_string(),
            args: vec![],
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            url: String::new(),
        }))
    }

    #[tokio::test]
    async fn test_scoped_sink_tags_session() {
        let (tx, mut rx) = mpsc::channel(4);
        let session_id = SessionId::new();
        let sink = SurfaceSink::new(tx).scoped(session_id);

        sink.emit(console_event()).await.unwrap();

        match rx.recv().await.unwrap() {
            Command::Surface(message) => {
                assert_eq!(message.session_id, Some(session_id));
                assert_eq!(message.event.kind(), SurfaceKind::Console);
            }
            _ => panic!("Expected surface command"),
        }
    }

    #[tokio::test]
    async fn test_try_emit_reports_full_queue() {
        let (tx, _rx) = mpsc::channel(1);
        let sink = SurfaceSink::new(tx);

        sink.try_emit(console_event()).unwrap();
        let result = sink.try_emit(console_event());

        assert!(matches!(result, Err(RecorderError::Ingestion { .. })));
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = SurfaceSink::new(tx);

        assert!(matches!(
            sink.try_emit(console_event()),
            Err(RecorderError::Channel)
        ));
        assert!(matches!(
            sink.emit(console_event()).await,
            Err(RecorderError::Channel)
        ));
    }
}
