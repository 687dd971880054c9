mod messages;

pub use messages::{
    AckResponse, RecorderMessage, RecorderResponse, RecordingStateResponse, RecordingsResponse,
    SessionSnapshot, SnapshotResponse,
};
