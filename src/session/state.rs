use chrono::{DateTime, Utc};
use serde_json::Value;
use std::time::{Duration, SystemTime};
use tracing::debug;

use super::buffers::{
    ConsoleLogEntry, ConsoleLogPayload, DomEventEntry, MediaCapture, NetworkEventEntry,
    NetworkEventPayload, SessionBuffers,
};
use super::types::{
    CaptureOptions, PageMetadata, SessionContext, SessionId, SessionStatus, SurfaceKind,
    TargetContext,
};
use crate::error::{RecorderError, Result};

/// A single telemetry item to append to the active session
#[derive(Debug, Clone, PartialEq)]
pub enum IngestEvent {
    Console(ConsoleLogPayload),
    Dom(Vec<Value>),
    Network(NetworkEventPayload),
}

impl IngestEvent {
    pub fn kind(&self) -> SurfaceKind {
        match self {
            IngestEvent::Console(_) => SurfaceKind::Console,
            IngestEvent::Dom(_) => SurfaceKind::Dom,
            IngestEvent::Network(_) => SurfaceKind::Network,
        }
    }
}

/// One recording attempt, from creation through finalization
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    target: TargetContext,
    options: CaptureOptions,
    status: SessionStatus,
    created_at: SystemTime,
    active_since: Option<SystemTime>,
    metadata: PageMetadata,
    buffers: SessionBuffers,
    error: Option<String>,
}

impl Session {
    pub fn new(target: TargetContext, options: CaptureOptions) -> Self {
        Self {
            id: SessionId::new(),
            target,
            options,
            status: SessionStatus::Starting,
            created_at: SystemTime::now(),
            active_since: None,
            metadata: PageMetadata::default(),
            buffers: SessionBuffers::default(),
            error: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn target(&self) -> &TargetContext {
        &self.target
    }

    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn metadata(&self) -> &PageMetadata {
        &self.metadata
    }

    pub fn buffers(&self) -> &SessionBuffers {
        &self.buffers
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn context(&self) -> SessionContext {
        SessionContext {
            session_id: self.id,
            target: self.target.clone(),
        }
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        debug!("Session {} status {:?} -> {:?}", self.id, self.status, status);
        self.status = status;
    }

    /// Enter the Active status and fix the time origin for relative offsets
    pub fn mark_active(&mut self, at: SystemTime) {
        self.active_since = Some(at);
        self.set_status(SessionStatus::Active);
    }

    pub fn set_metadata(&mut self, metadata: PageMetadata) {
        self.metadata = metadata;
    }

    /// Record a terminal error reason. The first reason recorded wins.
    pub fn record_error<S: Into<String>>(&mut self, reason: S) -> bool {
        if self.error.is_some() {
            return false;
        }
        self.error = Some(reason.into());
        true
    }

    pub fn attach_media(&mut self, media: MediaCapture) {
        self.buffers.media = Some(media);
    }

    pub fn offset_ms(&self, at: SystemTime) -> u64 {
        let origin = self.active_since.unwrap_or(self.created_at);
        at.duration_since(origin)
            .unwrap_or(Duration::ZERO)
            .as_millis() as u64
    }

    pub fn duration_ms(&self, now: SystemTime) -> u64 {
        match self.active_since {
            Some(_) => self.offset_ms(now),
            None => 0,
        }
    }

    /// Append an event to the matching buffer. A rejected event leaves the
    /// buffers untouched.
    pub fn ingest(&mut self, event: IngestEvent, arrived_at: SystemTime) -> Result<()> {
        let kind = event.kind();

        if !self.status.accepts_events() {
            return Err(ingestion(kind, format!("session is {:?}", self.status)));
        }
        if !self.options.enables(kind) {
            return Err(ingestion(kind, "capture disabled for this session"));
        }

        let offset_ms = self.offset_ms(arrived_at);

        match event {
            IngestEvent::Console(payload) => {
                if payload.level.trim().is_empty() {
                    return Err(ingestion(kind, "console entry without a level"));
                }
                self.buffers
                    .console
                    .push(ConsoleLogEntry { offset_ms, payload });
            }
            IngestEvent::Dom(events) => {
                if let Some(bad) = events.iter().position(|e| !e.is_object()) {
                    return Err(ingestion(
                        kind,
                        format!("event {} in batch is not an object", bad),
                    ));
                }
                self.buffers.dom.extend(
                    events
                        .into_iter()
                        .map(|event| DomEventEntry { offset_ms, event }),
                );
            }
            IngestEvent::Network(payload) => {
                if !NetworkEventPayload::is_allowed(&payload.method) {
                    return Err(ingestion(
                        kind,
                        format!("{} is not a captured network event", payload.method),
                    ));
                }
                self.buffers
                    .network
                    .push(NetworkEventEntry { offset_ms, payload });
            }
        }

        Ok(())
    }

    /// Consume the session, producing the immutable view handed to the finalizer
    pub fn freeze(self, ended_at: SystemTime) -> FrozenSession {
        let duration_ms = self.duration_ms(ended_at);
        let started_at = self.active_since.unwrap_or(self.created_at);

        FrozenSession {
            id: self.id,
            target: self.target,
            options: self.options,
            started_at: DateTime::<Utc>::from(started_at),
            duration_ms,
            metadata: self.metadata,
            buffers: self.buffers,
            error: self.error,
        }
    }
}

fn ingestion(kind: SurfaceKind, message: impl Into<String>) -> RecorderError {
    RecorderError::Ingestion {
        kind: kind.to_string(),
        message: message.into(),
    }
}

/// Session contents after stop, no longer mutable by the orchestrator
#[derive(Debug, Clone)]
pub struct FrozenSession {
    pub id: SessionId,
    pub target: TargetContext,
    pub options: CaptureOptions,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub metadata: PageMetadata,
    pub buffers: SessionBuffers,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn active_session(options: CaptureOptions) -> (Session, SystemTime) {
        let mut session = Session::new(TargetContext::new("tab-1"), options);
        let origin = SystemTime::now();
        session.mark_active(origin);
        (session, origin)
    }

    fn console(level: &str) -> IngestEvent {
        IngestEvent::Console(ConsoleLogPayload {
            level: level.to_string(),
            args: vec![json!("hello")],
            timestamp: "2024-01-01T00:00:00Z".to_string(),
            url: "https://example.com".to_string(),
        })
    }

    #[test]
    fn test_ingest_appends_with_relative_offset() {
        let (mut session, origin) = active_session(CaptureOptions::default());

        session
            .ingest(console("log"), origin + Duration::from_millis(250))
            .unwrap();
        session
            .ingest(
                IngestEvent::Dom(vec![json!({"type": 2}), json!({"type": 3})]),
                origin + Duration::from_millis(500),
            )
            .unwrap();

        assert_eq!(session.buffers().console.len(), 1);
        assert_eq!(session.buffers().console[0].offset_ms, 250);
        assert_eq!(session.buffers().dom.len(), 2);
        assert_eq!(session.buffers().dom[1].offset_ms, 500);
    }

    #[test]
    fn test_events_before_activation_clamp_to_zero() {
        let (mut session, origin) = active_session(CaptureOptions::default());
        let early = origin - Duration::from_millis(10);

        session
            .ingest(
                IngestEvent::Network(NetworkEventPayload {
                    method: "Network.requestWillBeSent".to_string(),
                    params: json!({"requestId": "1"}),
                }),
                early,
            )
            .unwrap();

        assert_eq!(session.buffers().network[0].offset_ms, 0);
    }

    #[test]
    fn test_ingest_rejected_outside_active() {
        let mut session = Session::new(TargetContext::new("tab-1"), CaptureOptions::default());
        let result = session.ingest(console("log"), SystemTime::now());

        assert!(matches!(result, Err(RecorderError::Ingestion { .. })));
        assert!(session.buffers().console.is_empty());
    }

    #[test]
    fn test_ingest_respects_disabled_surfaces() {
        let options = CaptureOptions {
            capture_console: false,
            ..CaptureOptions::default()
        };
        let (mut session, origin) = active_session(options);

        assert!(session.ingest(console("warn"), origin).is_err());
        assert!(session.buffers().console.is_empty());
    }

    #[test]
    fn test_malformed_dom_batch_is_rejected_whole() {
        let (mut session, origin) = active_session(CaptureOptions::default());

        let result = session.ingest(
            IngestEvent::Dom(vec![json!({"type": 2}), json!("not an event")]),
            origin,
        );

        assert!(result.is_err());
        assert!(session.buffers().dom.is_empty());
    }

    #[test]
    fn test_disallowed_network_method_is_rejected() {
        let (mut session, origin) = active_session(CaptureOptions::default());

        let result = session.ingest(
            IngestEvent::Network(NetworkEventPayload {
                method: "Network.dataReceived".to_string(),
                params: json!({}),
            }),
            origin,
        );

        assert!(result.is_err());
    }

    #[test]
    fn test_first_error_wins() {
        let (mut session, _) = active_session(CaptureOptions::default());

        assert!(session.record_error("debugger detached"));
        assert!(!session.record_error("media result timed out"));
        assert_eq!(session.error(), Some("debugger detached"));
    }

    #[test]
    fn test_freeze_carries_buffers_and_duration() {
        let (mut session, origin) = active_session(CaptureOptions::default());
        session.attach_media(MediaCapture::new(Bytes::from_static(b"webm"), "video/webm"));
        session.ingest(console("info"), origin).unwrap();

        let frozen = session.freeze(origin + Duration::from_secs(3));

        assert_eq!(frozen.duration_ms, 3000);
        assert_eq!(frozen.buffers.console.len(), 1);
        assert!(frozen.buffers.media.is_some());
        assert!(frozen.error.is_none());
    }
}
