use std::collections::VecDeque;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::channel::Command;
use super::types::{ActiveRun, RecorderState};
use crate::config::RecorderConfig;
use crate::events::EventBus;
use crate::finalizer::{RecordSummary, SessionFinalizer};
use crate::protocol::{RecordingStateResponse, SessionSnapshot};
use crate::session::{IngestEvent, SessionId, SurfaceKind};
use crate::surfaces::{CaptureSurfaces, SurfaceEvent, SurfaceMessage, SurfaceSink};

/// Owns the session and serialises every state change through one queue
pub(super) struct RecorderActor {
    pub(super) config: RecorderConfig,
    pub(super) surfaces: CaptureSurfaces,
    pub(super) finalizer: SessionFinalizer,
    pub(super) event_bus: Arc<EventBus>,
    pub(super) indicator: watch::Sender<bool>,
    pub(super) commands_tx: mpsc::Sender<Command>,
    pub(super) sink: SurfaceSink,
    pub(super) state: RecorderState,
    pub(super) run: Option<ActiveRun>,
    pub(super) last_summary: Option<RecordSummary>,
    commands: mpsc::Receiver<Command>,
    /// Commands taken off the queue early, run before anything newer
    deferred: VecDeque<Command>,
    cancellation_token: CancellationToken,
}

impl RecorderActor {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        config: RecorderConfig,
        surfaces: CaptureSurfaces,
        finalizer: SessionFinalizer,
        event_bus: Arc<EventBus>,
        indicator: watch::Sender<bool>,
        commands_tx: mpsc::Sender<Command>,
        commands: mpsc::Receiver<Command>,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config,
            surfaces,
            finalizer,
            event_bus,
            indicator,
            sink: SurfaceSink::new(commands_tx.clone()),
            commands_tx,
            state: RecorderState::Idle,
            run: None,
            last_summary: None,
            commands,
            deferred: VecDeque::new(),
            cancellation_token,
        }
    }

    pub(super) async fn run(mut self) {
        info!("Recorder orchestrator running");

        loop {
            if let Some(command) = self.deferred.pop_front() {
                self.handle_command(command).await;
                continue;
            }

            tokio::select! {
                _ = self.cancellation_token.cancelled() => {
                    debug!("Recorder cancellation requested");
                    break;
                }
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
            }
        }

        self.abort_session().await;
        info!("Recorder orchestrator stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::GetState { respond_to } => {
                let _ = respond_to.send(self.state_response());
            }
            Command::Start {
                target,
                options,
                respond_to,
            } => {
                let result = self.start_session(target, options).await;
                let _ = respond_to.send(result);
            }
            Command::Stop { respond_to } => {
                self.request_stop(Some(respond_to), None).await;
            }
            Command::Snapshot { respond_to } => {
                let _ = respond_to.send(self.snapshot());
            }
            Command::Surface(message) => self.handle_surface_message(message).await,
            Command::MediaResultTimeout { session_id } => {
                self.handle_media_timeout(session_id).await
            }
        }
    }

    /// Move to `state`, keeping the recording indicator in step
    pub(super) fn set_state(&mut self, state: RecorderState) {
        debug!("Recorder state {:?} -> {:?}", self.state, state);
        self.state = state;

        match state {
            RecorderState::Active => {
                self.indicator.send_replace(true);
            }
            RecorderState::Finalizing | RecorderState::FailedStart => {
                self.indicator.send_replace(false);
            }
            _ => {}
        }
    }

    fn state_response(&self) -> RecordingStateResponse {
        let now = SystemTime::now();
        let (has_recorded_data, recording_duration, session_id) = match &self.run {
            Some(run) => (
                run.session.buffers().has_data(),
                if self.state.is_recording() {
                    run.session.duration_ms(now)
                } else {
                    0
                },
                Some(run.session.id()),
            ),
            None => (
                self.last_summary.as_ref().is_some_and(RecordSummary::has_data),
                0,
                None,
            ),
        };

        RecordingStateResponse {
            is_recording: self.state.is_recording(),
            has_recorded_data,
            recording_duration,
            state: self.state,
            session_id,
        }
    }

    fn snapshot(&self) -> Option<SessionSnapshot> {
        self.run.as_ref().map(|run| SessionSnapshot {
            session_id: run.session.id(),
            status: run.session.status(),
            target_context_id: run.session.target().id().to_string(),
            options: *run.session.options(),
            counts: run.session.buffers().counts(),
            duration_ms: run.session.duration_ms(SystemTime::now()),
            awaiting_media: run.awaiting_media,
            error: run.session.error().map(str::to_string),
        })
    }

    async fn handle_surface_message(&mut self, message: SurfaceMessage) {
        if !self.accepts(message.session_id, message.event.kind()) {
            return;
        }

        match message.event {
            SurfaceEvent::Telemetry(event) => self.ingest(event, message.arrived_at),
            SurfaceEvent::MediaReady(capture) => self.on_media_ready(capture).await,
            SurfaceEvent::MediaError { reason } => self.on_media_error(reason).await,
            SurfaceEvent::Failed { surface, reason } => {
                self.on_surface_failure(surface, reason).await
            }
        }
    }

    /// Take everything already waiting in the queue. Telemetry for the
    /// current session is ingested now; other commands run next, in order.
    pub(super) fn drain_queued_telemetry(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Surface(SurfaceMessage {
                    session_id,
                    arrived_at,
                    event: SurfaceEvent::Telemetry(event),
                }) => {
                    if self.accepts(session_id, event.kind()) {
                        self.ingest(event, arrived_at);
                    }
                }
                other => self.deferred.push_back(other),
            }
        }
    }

    fn accepts(&self, session_id: Option<SessionId>, kind: SurfaceKind) -> bool {
        let Some(run) = self.run.as_ref() else {
            debug!("Dropping {} event, no session", kind);
            return false;
        };

        match session_id {
            Some(id) if id != run.session.id() => {
                debug!("Dropping {} event from stale session {}", kind, id);
                false
            }
            _ => true,
        }
    }

    fn ingest(&mut self, event: IngestEvent, arrived_at: SystemTime) {
        if let Some(run) = self.run.as_mut() {
            if let Err(e) = run.session.ingest(event, arrived_at) {
                warn!("Dropped event: {}", e);
            }
        }
    }
}
