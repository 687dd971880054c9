pub mod config;
pub mod error;
pub mod events;
pub mod finalizer;
pub mod orchestrator;
pub mod protocol;
pub mod report;
pub mod session;
pub mod surfaces;

pub use config::RecorderConfig;
pub use error::{RecorderError, Result, StorageError, SurfaceError};
pub use events::{EventBus, EventFilter, EventReceiver, RecorderEvent};
pub use finalizer::{FileSessionStore, PersistedSessionRecord, RecordSummary, SessionFinalizer, SessionStore};
pub use orchestrator::{RecorderBuilder, RecorderHandle, RecorderState};
pub use protocol::{RecorderMessage, RecorderResponse, RecordingStateResponse};
pub use session::{CaptureOptions, SessionBuffers, SessionId, TargetContext};
pub use surfaces::{CaptureSurfaces, DebuggerBackend, MediaBackend, ScriptHost, SurfaceSink};
