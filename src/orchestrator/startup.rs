use std::time::SystemTime;
use tracing::{error, info, warn};

use super::actor::RecorderActor;
use super::types::{ActiveRun, RecorderState, SurfaceHandles};
use crate::error::{RecorderError, Result, SurfaceError};
use crate::events::RecorderEvent;
use crate::session::{CaptureOptions, Session, SessionContext, SessionId, TargetContext};
use crate::surfaces::InjectedScript;

impl RecorderActor {
    /// Start every enabled surface for a new session. Either all of them
    /// start and the recorder becomes Active, or the ones that did start are
    /// torn down and the recorder returns to Idle.
    pub(super) async fn start_session(
        &mut self,
        target: TargetContext,
        options: CaptureOptions,
    ) -> Result<SessionId> {
        if self.state != RecorderState::Idle {
            warn!("Start requested while {:?}", self.state);
            return Err(RecorderError::AlreadyRecording);
        }

        self.set_state(RecorderState::Starting);
        let mut session = Session::new(target, options);
        let ctx = session.context();
        info!("Starting session {} on {}", ctx.session_id, ctx.target);

        let scripts = InjectedScript::required_by(&options);
        let surfaces = self.surfaces.clone();
        let sink = self.sink.clone();

        let (media, network, injected) = tokio::join!(
            async {
                match options.capture_video {
                    true => Some(surfaces.media.start(&ctx).await),
                    false => None,
                }
            },
            async {
                match options.capture_network {
                    true => Some(surfaces.network.start(&ctx, &sink).await),
                    false => None,
                }
            },
            async {
                match scripts.is_empty() {
                    true => None,
                    false => Some(surfaces.scripts.inject(&ctx, &scripts, &sink).await),
                }
            },
        );

        let handles = SurfaceHandles {
            media: matches!(media, Some(Ok(()))),
            network: matches!(network, Some(Ok(()))),
            // Partially injected scripts stay registered until stopped
            scripts: injected.is_some(),
        };

        let failures: Vec<SurfaceError> = [media, network, injected]
            .into_iter()
            .flatten()
            .filter_map(|result| result.err())
            .collect();

        if !failures.is_empty() {
            return Err(self.fail_start(&ctx, handles, failures).await);
        }

        match surfaces.scripts.describe(&ctx.target).await {
            Ok(metadata) => session.set_metadata(metadata),
            Err(e) => warn!("Could not read page metadata for {}: {}", ctx.target, e),
        }

        session.mark_active(SystemTime::now());
        self.run = Some(ActiveRun::new(session, handles));
        self.set_state(RecorderState::Active);

        let event = RecorderEvent::RecordingStarted {
            session_id: ctx.session_id,
            target_context_id: ctx.target.id().to_string(),
            timestamp: SystemTime::now(),
        };
        if let Err(e) = self.event_bus.publish(event).await {
            warn!("Failed to publish recording start: {}", e);
        }

        info!("Session {} active", ctx.session_id);
        Ok(ctx.session_id)
    }

    /// Roll back each surface that started. Every rollback is attempted even
    /// when an earlier one fails.
    async fn fail_start(
        &mut self,
        ctx: &SessionContext,
        handles: SurfaceHandles,
        failures: Vec<SurfaceError>,
    ) -> RecorderError {
        self.set_state(RecorderState::FailedStart);
        for failure in &failures {
            error!("Session {} failed to start: {}", ctx.session_id, failure);
        }

        if handles.media {
            if let Err(e) = self.surfaces.media.discard().await {
                warn!("Media rollback failed: {}", e);
            }
        }
        if handles.network {
            if let Err(e) = self.surfaces.network.stop().await {
                warn!("Network rollback failed: {}", e);
            }
        }
        if handles.scripts {
            for e in self.surfaces.scripts.stop(&ctx.target).await {
                warn!("Script rollback failed: {}", e);
            }
        }

        self.set_state(RecorderState::Idle);

        let message = failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ");
        RecorderError::startup(message)
    }
}
