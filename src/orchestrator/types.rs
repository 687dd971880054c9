use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;

use crate::session::Session;

/// Orchestrator lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecorderState {
    Idle,
    Starting,
    Active,
    Stopping,
    Finalizing,
    FailedStart,
}

impl RecorderState {
    /// Whether a session is capturing or winding down
    pub fn is_recording(&self) -> bool {
        matches!(self, RecorderState::Active | RecorderState::Stopping)
    }
}

/// Which capture surfaces were started for the current session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(super) struct SurfaceHandles {
    pub media: bool,
    pub network: bool,
    pub scripts: bool,
}

/// The session owned by the orchestrator plus its stop bookkeeping
pub(super) struct ActiveRun {
    pub session: Session,
    pub handles: SurfaceHandles,
    pub awaiting_media: bool,
    pub finalize_requested: bool,
    pub media_timeout: Option<JoinHandle<()>>,
}

impl ActiveRun {
    pub fn new(session: Session, handles: SurfaceHandles) -> Self {
        Self {
            session,
            handles,
            awaiting_media: false,
            finalize_requested: false,
            media_timeout: None,
        }
    }

    pub fn cancel_media_timeout(&mut self) {
        if let Some(task) = self.media_timeout.take() {
            task.abort();
        }
    }
}
