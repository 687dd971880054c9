use tokio::sync::oneshot;

use crate::error::Result;
use crate::protocol::{RecordingStateResponse, SessionSnapshot};
use crate::session::{CaptureOptions, SessionId, TargetContext};
use crate::surfaces::SurfaceMessage;

/// Work items processed one at a time by the orchestrator
#[derive(Debug)]
pub(crate) enum Command {
    GetState {
        respond_to: oneshot::Sender<RecordingStateResponse>,
    },
    Start {
        target: TargetContext,
        options: CaptureOptions,
        respond_to: oneshot::Sender<Result<SessionId>>,
    },
    Stop {
        respond_to: oneshot::Sender<Result<()>>,
    },
    Snapshot {
        respond_to: oneshot::Sender<Option<SessionSnapshot>>,
    },
    Surface(SurfaceMessage),
    MediaResultTimeout {
        session_id: SessionId,
    },
}
