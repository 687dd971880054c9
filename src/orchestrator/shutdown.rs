use std::time::SystemTime;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use super::actor::RecorderActor;
use super::channel::Command;
use super::types::RecorderState;
use crate::error::{RecorderError, Result};
use crate::events::RecorderEvent;
use crate::finalizer::PersistedSessionRecord;
use crate::session::{MediaCapture, SessionId, SessionStatus, SurfaceKind};

const MEDIA_TIMEOUT_REASON: &str = "media result timed out";
const SHUTDOWN_REASON: &str = "recorder shut down";

impl RecorderActor {
    /// Move an Active session to Stopping and stop its surfaces. `failure`
    /// carries the reason when the stop was forced by a surface.
    pub(super) async fn request_stop(
        &mut self,
        respond_to: Option<oneshot::Sender<Result<()>>>,
        failure: Option<String>,
    ) {
        if self.state != RecorderState::Active || self.run.is_none() {
            debug!("Stop requested while {:?}, nothing to do", self.state);
            if let Some(tx) = respond_to {
                let _ = tx.send(Ok(()));
            }
            return;
        }

        self.set_state(RecorderState::Stopping);
        let Some(run) = self.run.as_mut() else {
            return;
        };
        run.session.set_status(SessionStatus::Stopping);
        if let Some(reason) = failure {
            run.session.record_error(reason);
        }
        if let Some(tx) = respond_to {
            let _ = tx.send(Ok(()));
        }

        let session_id = run.session.id();
        let target = run.session.target().clone();
        let handles = run.handles;
        let surfaces = self.surfaces.clone();
        info!("Stopping session {}", session_id);

        let awaiting = handles.media && surfaces.media.stop(&self.sink);
        if !handles.media && surfaces.media.is_recording() {
            if let Err(e) = surfaces.media.discard().await {
                warn!("Media discard failed: {}", e);
            }
        }

        let (network, scripts) = tokio::join!(
            async {
                match handles.network {
                    true => surfaces.network.stop().await,
                    false => Ok(()),
                }
            },
            async {
                match handles.scripts {
                    true => surfaces.scripts.stop(&target).await,
                    false => Vec::new(),
                }
            },
        );

        if let Err(e) = network {
            warn!("Network capture did not stop cleanly: {}", e);
            run.session.record_error(e.to_string());
        }
        for e in scripts {
            run.session.record_error(e.to_string());
        }

        run.handles.media = false;
        run.handles.network = false;
        run.handles.scripts = false;
        run.awaiting_media = awaiting;

        if awaiting {
            let commands = self.commands_tx.clone();
            let timeout = self.config.media_result_timeout();
            run.media_timeout = Some(tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                let _ = commands.send(Command::MediaResultTimeout { session_id }).await;
            }));
            debug!("Waiting up to {:?} for media buffer", timeout);
        } else {
            self.request_finalize(session_id).await;
        }
    }

    pub(super) async fn on_media_ready(&mut self, capture: MediaCapture) {
        let state = self.state;
        let Some(run) = self.run.as_mut() else {
            return;
        };

        match state {
            RecorderState::Stopping if run.awaiting_media => {
                run.session.attach_media(capture);
                run.awaiting_media = false;
                run.cancel_media_timeout();
                let session_id = run.session.id();
                self.request_finalize(session_id).await;
            }
            RecorderState::Active => {
                // The recorder ended on its own; keep what it produced
                run.session.attach_media(capture);
                run.handles.media = false;
            }
            _ => debug!("Ignoring duplicate media buffer for {}", run.session.id()),
        }
    }

    pub(super) async fn on_media_error(&mut self, reason: String) {
        let state = self.state;
        let Some(run) = self.run.as_mut() else {
            return;
        };

        match state {
            RecorderState::Stopping if run.awaiting_media => {
                warn!("Media capture failed during stop: {}", reason);
                run.session.record_error(reason);
                run.awaiting_media = false;
                run.cancel_media_timeout();
                let session_id = run.session.id();
                self.request_finalize(session_id).await;
            }
            RecorderState::Active => {
                run.handles.media = false;
                self.on_surface_failure(SurfaceKind::Media, reason).await;
            }
            _ => debug!("Ignoring media error after result: {}", reason),
        }
    }

    /// A surface failed on its own. Active sessions are stopped with the
    /// failure as their error; later failures are only recorded.
    pub(super) async fn on_surface_failure(&mut self, surface: SurfaceKind, reason: String) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        let session_id = run.session.id();
        let failure = RecorderError::surface(surface, reason.clone());
        error!("Session {}: {}", session_id, failure);

        match self.state {
            RecorderState::Active => {
                let event = RecorderEvent::SurfaceFailed {
                    session_id,
                    surface,
                    reason: reason.clone(),
                };
                if let Err(e) = self.event_bus.publish(event).await {
                    debug!("No listener for surface failure: {}", e);
                }
                self.request_stop(None, Some(failure.to_string())).await;
            }
            RecorderState::Stopping => {
                run.session.record_error(failure.to_string());
            }
            _ => {}
        }
    }

    /// Finalize once. Telemetry already queued, such as DOM events flushed
    /// by the page scripts during stop, is ingested first.
    pub(super) async fn request_finalize(&mut self, session_id: SessionId) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if run.finalize_requested {
            debug!("Finalize already requested for {}", session_id);
            return;
        }
        run.finalize_requested = true;

        self.drain_queued_telemetry();
        self.finalize_session(session_id).await;
    }

    pub(super) async fn handle_media_timeout(&mut self, session_id: SessionId) {
        let Some(run) = self.run.as_mut() else {
            return;
        };
        if run.session.id() != session_id || !run.awaiting_media {
            return;
        }

        warn!("No media result for session {}", session_id);
        run.session.record_error(MEDIA_TIMEOUT_REASON);
        run.awaiting_media = false;
        run.media_timeout = None;
        self.request_finalize(session_id).await;
    }

    /// Freeze the session, hand it to the finalizer and return to Idle
    pub(super) async fn finalize_session(&mut self, session_id: SessionId) {
        match self.run.as_ref() {
            Some(run) if run.session.id() == session_id => {}
            _ => {
                debug!("Ignoring finalize for {}, not current", session_id);
                return;
            }
        }

        self.set_state(RecorderState::Finalizing);
        let Some(mut run) = self.run.take() else {
            return;
        };
        run.cancel_media_timeout();
        run.session.set_status(SessionStatus::Finalizing);

        let frozen = run.session.freeze(SystemTime::now());
        let fallback = PersistedSessionRecord::from_session(&frozen);

        let (summary, error, persisted) = match self.finalizer.finalize(frozen).await {
            Ok(outcome) => (outcome.record.summary(), outcome.error, outcome.persisted),
            Err(e) => {
                error!("Session {} could not be finalized: {}", session_id, e);
                let mut summary = fallback.summary();
                summary.error = Some(e.to_string());
                (summary, Some(e.to_string()), false)
            }
        };

        self.last_summary = Some(summary.clone());
        self.set_state(RecorderState::Idle);
        info!("Session {} finalized (persisted={})", session_id, persisted);

        let event = RecorderEvent::RecordingStopped {
            session_id,
            error,
            summary,
            persisted,
        };
        if let Err(e) = self.event_bus.publish(event).await {
            debug!("No listener for recording stop: {}", e);
        }
    }

    /// Tear down whatever is running when the orchestrator exits
    pub(super) async fn abort_session(&mut self) {
        let Some(run) = self.run.as_mut() else {
            return;
        };

        let session_id = run.session.id();
        warn!("Aborting session {} on shutdown", session_id);
        run.session.record_error(SHUTDOWN_REASON);
        run.cancel_media_timeout();

        let target = run.session.target().clone();
        if let Err(e) = self.surfaces.media.discard().await {
            warn!("Media discard failed: {}", e);
        }
        if let Err(e) = self.surfaces.network.stop().await {
            warn!("Network stop failed: {}", e);
        }
        for e in self.surfaces.scripts.stop(&target).await {
            warn!("Script stop failed: {}", e);
        }

        self.finalize_session(session_id).await;
    }
}
