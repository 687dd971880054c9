use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::sink::{SurfaceEvent, SurfaceSink};
use crate::error::SurfaceError;
use crate::session::{MediaCapture, SessionContext, SessionId, TargetContext};

/// Encoding reported when the recorder falls back to its own default
pub const DEFAULT_MIME_TYPE: &str = "video/webm";

/// Handle to a host media stream for a target context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamHandle {
    pub stream_id: String,
    pub target: TargetContext,
}

/// Host facility that produces a tab media stream and encodes it
#[async_trait]
pub trait MediaBackend: Send + Sync {
    async fn acquire_stream(&self, target: &TargetContext) -> Result<StreamHandle, SurfaceError>;

    fn is_type_supported(&self, mime_type: &str) -> bool;

    /// Start encoding. `None` lets the recorder pick its default encoding.
    async fn start_recorder(
        &self,
        stream: &StreamHandle,
        mime_type: Option<&str>,
        timeslice: Duration,
    ) -> Result<(), SurfaceError>;

    /// Stop encoding and return every chunk produced
    async fn stop_recorder(&self, stream: &StreamHandle) -> Result<Vec<Bytes>, SurfaceError>;

    async fn release_stream(&self, stream: &StreamHandle) -> Result<(), SurfaceError>;
}

#[derive(Debug)]
struct ActiveRecording {
    session_id: SessionId,
    stream: StreamHandle,
    mime_type: String,
}

/// Video capture surface. Owns at most one recording at a time.
pub struct MediaCaptureAdapter {
    backend: Arc<dyn MediaBackend>,
    mime_types: Vec<String>,
    timeslice: Duration,
    active: Mutex<Option<ActiveRecording>>,
}

impl MediaCaptureAdapter {
    pub fn new(backend: Arc<dyn MediaBackend>, mime_types: Vec<String>, timeslice: Duration) -> Self {
        Self {
            backend,
            mime_types,
            timeslice,
            active: Mutex::new(None),
        }
    }

    /// First configured encoding the backend accepts
    pub fn select_mime_type(&self) -> Option<&str> {
        self.mime_types
            .iter()
            .map(String::as_str)
            .find(|mime| self.backend.is_type_supported(mime))
    }

    pub fn is_recording(&self) -> bool {
        self.active.lock().is_some()
    }

    pub async fn start(&self, ctx: &SessionContext) -> Result<(), SurfaceError> {
        let stream = self.backend.acquire_stream(&ctx.target).await?;

        let selected = self.select_mime_type().map(str::to_string);
        if selected.is_none() {
            warn!(
                "None of {} configured encodings supported, using recorder default",
                self.mime_types.len()
            );
        }

        if let Err(e) = self
            .backend
            .start_recorder(&stream, selected.as_deref(), self.timeslice)
            .await
        {
            error!("Media recorder failed to start: {}", e);
            if let Err(release_err) = self.backend.release_stream(&stream).await {
                warn!("Failed to release media stream after start failure: {}", release_err);
            }
            return Err(e);
        }

        let mime_type = selected.unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());
        info!("Media capture started on {} using {}", ctx.target, mime_type);

        *self.active.lock() = Some(ActiveRecording {
            session_id: ctx.session_id,
            stream,
            mime_type,
        });

        Ok(())
    }

    /// Ask the recorder to finish. The encoded buffer or a capture error is
    /// delivered later through `sink`. Returns whether a result will follow.
    pub fn stop(&self, sink: &SurfaceSink) -> bool {
        let Some(recording) = self.active.lock().take() else {
            debug!("Media stop requested with no active recording");
            return false;
        };

        let backend = Arc::clone(&self.backend);
        let sink = sink.scoped(recording.session_id);

        tokio::spawn(async move {
            let event = match backend.stop_recorder(&recording.stream).await {
                Ok(chunks) => assemble(chunks, recording.mime_type),
                Err(e) => Err(e),
            };

            if let Err(e) = backend.release_stream(&recording.stream).await {
                warn!("Failed to release media stream: {}", e);
            }

            let event = match event {
                Ok(capture) => {
                    info!(
                        "Media buffer ready: {} bytes of {}",
                        capture.size(),
                        capture.mime_type
                    );
                    SurfaceEvent::MediaReady(capture)
                }
                Err(e) => {
                    warn!("Media capture ended without a buffer: {}", e);
                    SurfaceEvent::MediaError {
                        reason: e.to_string(),
                    }
                }
            };

            if let Err(e) = sink.emit(event).await {
                error!("Failed to deliver media result: {}", e);
            }
        });

        true
    }

    /// Tear down a recording without delivering its output
    pub async fn discard(&self) -> Result<(), SurfaceError> {
        let Some(recording) = self.active.lock().take() else {
            return Ok(());
        };

        debug!("Discarding media recording for session {}", recording.session_id);
        let stopped = self.backend.stop_recorder(&recording.stream).await.map(|_| ());
        let released = self.backend.release_stream(&recording.stream).await;
        stopped.and(released)
    }
}

fn assemble(chunks: Vec<Bytes>, mime_type: String) -> Result<MediaCapture, SurfaceError> {
    let total: usize = chunks.iter().map(Bytes::len).sum();
    if total == 0 {
        return Err(SurfaceError::NoData);
    }

    let mut buffer = BytesMut::with_capacity(total);
    for chunk in chunks {
        buffer.extend_from_slice(&chunk);
    }

    Ok(MediaCapture::new(buffer.freeze(), mime_type))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Command;
    use crate::surfaces::simulated::SimulatedMediaBackend;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn context() -> SessionContext {
        SessionContext {
            session_id: SessionId::new(),
            target: TargetContext::new("tab-1"),
        }
    }

    fn default_mimes() -> Vec<String> {
        vec![
            "video/webm;codecs=vp9,opus".to_string(),
            "video/webm;codecs=vp8,opus".to_string(),
            "video/webm".to_string(),
        ]
    }

    async fn next_media_event(rx: &mut mpsc::Receiver<Command>) -> (Option<SessionId>, SurfaceEvent) {
        match timeout(Duration::from_secs(1), rx.recv()).await.unwrap() {
            Some(Command::Surface(message)) => (message.session_id, message.event),
            _ => panic!("Expected media result"),
        }
    }

    #[test]
    fn test_mime_fallback_order() {
        let backend = SimulatedMediaBackend::new().with_supported(&["video/webm"]);
        let adapter =
            MediaCaptureAdapter::new(Arc::new(backend), default_mimes(), Duration::from_secs(1));

        assert_eq!(adapter.select_mime_type(), Some("video/webm"));
    }

    #[tokio::test]
    async fn test_unsupported_list_uses_recorder_default() {
        let backend = Arc::new(SimulatedMediaBackend::new().with_supported(&[]));
        let adapter = MediaCaptureAdapter::new(backend.clone(), default_mimes(), Duration::from_secs(1));

        adapter.start(&context()).await.unwrap();

        assert_eq!(backend.last_requested_mime(), Some(None));
        assert!(adapter.is_recording());
    }

    #[tokio::test]
    async fn test_stop_delivers_tagged_buffer() {
        let backend = Arc::new(
            SimulatedMediaBackend::new().with_chunks(vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]),
        );
        let adapter = MediaCaptureAdapter::new(backend.clone(), default_mimes(), Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(4);
        let ctx = context();

        adapter.start(&ctx).await.unwrap();
        assert!(adapter.stop(&SurfaceSink::new(tx)));

        let (session_id, event) = next_media_event(&mut rx).await;
        assert_eq!(session_id, Some(ctx.session_id));
        match event {
            SurfaceEvent::MediaReady(capture) => {
                assert_eq!(capture.buffer, Bytes::from_static(b"abcd"));
                assert_eq!(capture.mime_type, "video/webm;codecs=vp9,opus");
            }
            other => panic!("Unexpected event: {:?}", other),
        }
        assert_eq!(backend.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_empty_recording_reports_no_data() {
        let backend = Arc::new(SimulatedMediaBackend::new().with_chunks(vec![]));
        let adapter = MediaCaptureAdapter::new(backend, default_mimes(), Duration::from_secs(1));
        let (tx, mut rx) = mpsc::channel(4);

        adapter.start(&context()).await.unwrap();
        adapter.stop(&SurfaceSink::new(tx));

        let (_, event) = next_media_event(&mut rx).await;
        assert_eq!(
            event,
            SurfaceEvent::MediaError {
                reason: "No video data was recorded.".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_recorder_start_failure_releases_stream() {
        let backend = Arc::new(SimulatedMediaBackend::new().failing_start());
        let adapter = MediaCaptureAdapter::new(backend.clone(), default_mimes(), Duration::from_secs(1));

        assert!(adapter.start(&context()).await.is_err());
        assert!(!adapter.is_recording());
        assert_eq!(backend.active_streams(), 0);
    }

    #[tokio::test]
    async fn test_stop_without_recording() {
        let backend = Arc::new(SimulatedMediaBackend::new());
        let adapter = MediaCaptureAdapter::new(backend, default_mimes(), Duration::from_secs(1));
        let (tx, _rx) = mpsc::channel(4);

        assert!(!adapter.stop(&SurfaceSink::new(tx)));
        assert!(adapter.discard().await.is_ok());
    }
}
