use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::actor::RecorderActor;
use super::channel::Command;
use crate::config::RecorderConfig;
use crate::error::{RecorderError, Result};
use crate::events::{EventBus, EventFilter, EventReceiver, RecorderEvent};
use crate::finalizer::{FileSessionStore, PersistedSessionRecord, RecordSummary, SessionFinalizer, SessionStore};
use crate::protocol::{
    AckResponse, RecorderMessage, RecorderResponse, RecordingStateResponse, RecordingsResponse,
    SessionSnapshot, SnapshotResponse,
};
use crate::session::{
    CaptureOptions, ConsoleLogPayload, IngestEvent, MediaCapture, SessionBuffers, SessionId,
    TargetContext,
};
use crate::surfaces::{CaptureSurfaces, DebuggerBackend, MediaBackend, ScriptHost, SurfaceEvent, SurfaceSink};

/// Assembles a recorder from its host backends and spawns the orchestrator
pub struct RecorderBuilder {
    config: RecorderConfig,
    media: Option<Arc<dyn MediaBackend>>,
    debugger: Option<Arc<dyn DebuggerBackend>>,
    scripts: Option<Arc<dyn ScriptHost>>,
    store: Option<Arc<dyn SessionStore>>,
    event_bus: Option<Arc<EventBus>>,
}

impl RecorderBuilder {
    pub fn new(config: RecorderConfig) -> Self {
        Self {
            config,
            media: None,
            debugger: None,
            scripts: None,
            store: None,
            event_bus: None,
        }
    }

    pub fn with_media_backend(mut self, backend: Arc<dyn MediaBackend>) -> Self {
        self.media = Some(backend);
        self
    }

    pub fn with_debugger_backend(mut self, backend: Arc<dyn DebuggerBackend>) -> Self {
        self.debugger = Some(backend);
        self
    }

    pub fn with_script_host(mut self, host: Arc<dyn ScriptHost>) -> Self {
        self.scripts = Some(host);
        self
    }

    /// Use `store` instead of a file store rooted at the configured path
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    /// Validate the configuration and start the orchestrator task
    pub fn spawn(self) -> Result<RecorderHandle> {
        self.config.validate()?;

        let media = self
            .media
            .ok_or_else(|| RecorderError::component("media", "no media backend configured"))?;
        let debugger = self
            .debugger
            .ok_or_else(|| RecorderError::component("network", "no debugger backend configured"))?;
        let scripts = self
            .scripts
            .ok_or_else(|| RecorderError::component("scripts", "no script host configured"))?;

        let config = self.config;
        let store = self.store.unwrap_or_else(|| {
            Arc::new(FileSessionStore::new(
                config.storage_path(),
                config.storage.max_recent_records,
            ))
        });
        let event_bus = self
            .event_bus
            .unwrap_or_else(|| Arc::new(EventBus::new(config.system.event_bus_capacity)));

        let surfaces = CaptureSurfaces::new(&config, media, debugger, scripts);
        let finalizer = SessionFinalizer::new(
            Arc::clone(&store),
            Arc::clone(&event_bus),
            config.storage.open_review_on_finalize,
        );

        let (commands_tx, commands_rx) = mpsc::channel(config.system.command_queue_capacity);
        let (indicator_tx, indicator_rx) = watch::channel(false);
        let cancellation_token = CancellationToken::new();

        let actor = RecorderActor::new(
            config.clone(),
            surfaces,
            finalizer,
            Arc::clone(&event_bus),
            indicator_tx,
            commands_tx.clone(),
            commands_rx,
            cancellation_token.clone(),
        );
        let task = tokio::spawn(actor.run());
        info!("Recorder started");

        Ok(RecorderHandle {
            config: Arc::new(config),
            commands: commands_tx.clone(),
            sink: SurfaceSink::new(commands_tx),
            event_bus,
            store,
            indicator: indicator_rx,
            cancellation_token,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }
}

/// Cloneable entry point to a running recorder
#[derive(Clone)]
pub struct RecorderHandle {
    config: Arc<RecorderConfig>,
    commands: mpsc::Sender<Command>,
    sink: SurfaceSink,
    event_bus: Arc<EventBus>,
    store: Arc<dyn SessionStore>,
    indicator: watch::Receiver<bool>,
    cancellation_token: CancellationToken,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl RecorderHandle {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| RecorderError::Channel)?;
        rx.await
            .map_err(|_| RecorderError::system("orchestrator dropped the request"))
    }

    pub async fn get_state(&self) -> Result<RecordingStateResponse> {
        self.request(|respond_to| Command::GetState { respond_to }).await
    }

    /// Start a session on `target_context_id`. Options default to the
    /// configured capture switches.
    pub async fn start(
        &self,
        target_context_id: impl Into<String>,
        options: Option<CaptureOptions>,
    ) -> Result<SessionId> {
        let target = TargetContext::new(target_context_id);
        let options = options.unwrap_or_else(|| self.config.default_capture_options());
        self.request(|respond_to| Command::Start {
            target,
            options,
            respond_to,
        })
        .await?
    }

    /// Begin stopping the active session. Returns once the session is
    /// Stopping; completion is announced with `RecordingStopped`. Stopping
    /// an idle recorder succeeds without doing anything.
    pub async fn stop(&self) -> Result<()> {
        self.request(|respond_to| Command::Stop { respond_to }).await?
    }

    pub async fn snapshot(&self) -> Result<Option<SessionSnapshot>> {
        self.request(|respond_to| Command::Snapshot { respond_to }).await
    }

    pub fn console_log(&self, payload: ConsoleLogPayload) -> Result<()> {
        self.sink
            .try_emit(SurfaceEvent::Telemetry(IngestEvent::Console(payload)))
    }

    pub fn dom_events(&self, events: Vec<Value>) -> Result<()> {
        self.sink
            .try_emit(SurfaceEvent::Telemetry(IngestEvent::Dom(events)))
    }

    /// Deliver an encoded buffer produced outside the media adapter
    pub async fn media_buffer_ready(
        &self,
        session_id: Option<SessionId>,
        capture: MediaCapture,
    ) -> Result<()> {
        self.scoped_sink(session_id)
            .emit(SurfaceEvent::MediaReady(capture))
            .await
    }

    pub async fn media_capture_error(
        &self,
        session_id: Option<SessionId>,
        reason: impl Into<String>,
    ) -> Result<()> {
        self.scoped_sink(session_id)
            .emit(SurfaceEvent::MediaError {
                reason: reason.into(),
            })
            .await
    }

    fn scoped_sink(&self, session_id: Option<SessionId>) -> SurfaceSink {
        match session_id {
            Some(id) => self.sink.scoped(id),
            None => self.sink.clone(),
        }
    }

    pub fn subscribe(&self, name: &str, filter: EventFilter) -> EventReceiver {
        EventReceiver::new(self.event_bus.subscribe(), filter, name.to_string())
    }

    pub fn event_bus(&self) -> Arc<EventBus> {
        Arc::clone(&self.event_bus)
    }

    /// True while a session is Active or Stopping
    pub fn indicator(&self) -> watch::Receiver<bool> {
        self.indicator.clone()
    }

    pub async fn list_recordings(&self) -> Result<Vec<RecordSummary>> {
        Ok(self.store.list_recent().await?)
    }

    pub async fn load_recording(
        &self,
        id: &SessionId,
    ) -> Result<(PersistedSessionRecord, SessionBuffers)> {
        let record = self.store.load_record(id).await?;
        let buffers = self.store.load_buffers(id).await?;
        Ok((record, buffers))
    }

    pub async fn delete_recording(&self, id: &SessionId) -> Result<()> {
        self.store.delete(id).await?;
        info!("Deleted recording {}", id);

        let event = RecorderEvent::RecordingDeleted { session_id: *id };
        if let Err(e) = self.event_bus.publish(event).await {
            debug!("No listener for recording deletion: {}", e);
        }
        Ok(())
    }

    /// Handle a wire message. Fire-and-forget messages return `None`.
    pub async fn dispatch(&self, message: RecorderMessage) -> Option<RecorderResponse> {
        match message {
            RecorderMessage::GetRecordingState => Some(match self.get_state().await {
                Ok(state) => RecorderResponse::State(state),
                Err(e) => RecorderResponse::Ack(AckResponse::failed(e.to_string())),
            }),
            RecorderMessage::StartRecording {
                target_context_id,
                options,
            } => Some(RecorderResponse::Ack(
                match self.start(target_context_id, options).await {
                    Ok(id) => AckResponse::started(id),
                    Err(e) => AckResponse::failed(e.to_string()),
                },
            )),
            RecorderMessage::StopRecording => Some(RecorderResponse::Ack(match self.stop().await {
                Ok(()) => AckResponse::ok(),
                Err(e) => AckResponse::failed(e.to_string()),
            })),
            RecorderMessage::ConsoleLogCaptured(payload) => {
                if let Err(e) = self.console_log(payload) {
                    warn!("Console event not queued: {}", e);
                }
                None
            }
            RecorderMessage::DomEvents { events } => {
                if let Err(e) = self.dom_events(events) {
                    warn!("DOM events not queued: {}", e);
                }
                None
            }
            RecorderMessage::MediaBufferReady {
                buffer,
                mime_type,
                session_id,
            } => {
                let capture = MediaCapture::new(buffer, mime_type);
                if let Err(e) = self.media_buffer_ready(session_id, capture).await {
                    warn!("Media buffer not delivered: {}", e);
                }
                None
            }
            RecorderMessage::MediaCaptureError { reason, session_id } => {
                if let Err(e) = self.media_capture_error(session_id, reason).await {
                    warn!("Media error not delivered: {}", e);
                }
                None
            }
            RecorderMessage::GetSessionSnapshot => Some(match self.snapshot().await {
                Ok(snapshot) => RecorderResponse::Snapshot(SnapshotResponse { snapshot }),
                Err(e) => RecorderResponse::Ack(AckResponse::failed(e.to_string())),
            }),
            RecorderMessage::ListRecordings => Some(match self.list_recordings().await {
                Ok(recordings) => RecorderResponse::Recordings(RecordingsResponse { recordings }),
                Err(e) => RecorderResponse::Ack(AckResponse::failed(e.to_string())),
            }),
            RecorderMessage::DeleteRecording { id } => Some(RecorderResponse::Ack(
                match self.delete_recording(&id).await {
                    Ok(()) => AckResponse::ok(),
                    Err(e) => AckResponse::failed(e.to_string()),
                },
            )),
        }
    }

    /// Stop the orchestrator, finalizing any session still running
    pub async fn shutdown(&self) {
        self.cancellation_token.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("Recorder task ended abnormally: {}", e);
            }
        }
        info!("Recorder shut down");
    }
}
