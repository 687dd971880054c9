mod buffers;
mod state;
mod types;

pub use buffers::{
    media_extension,
    BufferCounts, ConsoleLogEntry, ConsoleLogPayload, DomEventEntry, MediaCapture,
    NetworkEventEntry, NetworkEventPayload, SessionBuffers, NETWORK_EVENT_ALLOW_LIST,
};
pub use state::{FrozenSession, IngestEvent, Session};
pub use types::{
    CaptureOptions, PageMetadata, SessionContext, SessionId, SessionStatus, SurfaceKind,
    TargetContext,
};
