use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::finalizer::RecordSummary;
use crate::orchestrator::RecorderState;
use crate::session::{BufferCounts, CaptureOptions, ConsoleLogPayload, SessionId, SessionStatus};

/// Messages accepted by the recorder, tagged by `type`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RecorderMessage {
    GetRecordingState,
    #[serde(rename_all = "camelCase")]
    StartRecording {
        target_context_id: String,
        #[serde(default)]
        options: Option<CaptureOptions>,
    },
    StopRecording,
    ConsoleLogCaptured(ConsoleLogPayload),
    DomEvents {
        events: Vec<Value>,
    },
    #[serde(rename_all = "camelCase")]
    MediaBufferReady {
        buffer: Bytes,
        mime_type: String,
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    #[serde(rename_all = "camelCase")]
    MediaCaptureError {
        reason: String,
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    GetSessionSnapshot,
    ListRecordings,
    DeleteRecording {
        id: SessionId,
    },
}

impl RecorderMessage {
    /// Whether the sender expects a response
    pub fn expects_response(&self) -> bool {
        !matches!(
            self,
            RecorderMessage::ConsoleLogCaptured(_)
                | RecorderMessage::DomEvents { .. }
                | RecorderMessage::MediaBufferReady { .. }
                | RecorderMessage::MediaCaptureError { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordingStateResponse {
    pub is_recording: bool,
    pub has_recorded_data: bool,
    /// Milliseconds since the active session started, 0 when idle
    pub recording_duration: u64,
    pub state: RecorderState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AckResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<SessionId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AckResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            session_id: None,
            error: None,
        }
    }

    pub fn started(session_id: SessionId) -> Self {
        Self {
            success: true,
            session_id: Some(session_id),
            error: None,
        }
    }

    pub fn failed<S: Into<String>>(error: S) -> Self {
        Self {
            success: false,
            session_id: None,
            error: Some(error.into()),
        }
    }
}

/// Live view of the current session's buffers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub status: SessionStatus,
    pub target_context_id: String,
    pub options: CaptureOptions,
    pub counts: BufferCounts,
    pub duration_ms: u64,
    pub awaiting_media: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotResponse {
    pub snapshot: Option<SessionSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingsResponse {
    pub recordings: Vec<RecordSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecorderResponse {
    State(RecordingStateResponse),
    Snapshot(SnapshotResponse),
    Recordings(RecordingsResponse),
    Ack(AckResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_start_message_wire_format() {
        let message: RecorderMessage = serde_json::from_value(json!({
            "type": "START_RECORDING",
            "targetContextId": "42",
            "options": {"captureVideo": false, "captureConsole": true}
        }))
        .unwrap();

        match message {
            RecorderMessage::StartRecording {
                target_context_id,
                options: Some(options),
            } => {
                assert_eq!(target_context_id, "42");
                assert!(!options.capture_video);
                assert!(options.capture_network);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_console_message_is_flat() {
        let message: RecorderMessage = serde_json::from_value(json!({
            "type": "CONSOLE_LOG_CAPTURED",
            "level": "warn",
            "args": ["deprecated", {"api": "v1"}],
            "timestamp": "2024-05-01T10:00:00.000Z",
            "url": "https://example.com/"
        }))
        .unwrap();

        assert!(!message.expects_response());
        match message {
            RecorderMessage::ConsoleLogCaptured(payload) => {
                assert_eq!(payload.level, "warn");
                assert_eq!(payload.args.len(), 2);
            }
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_unit_messages() {
        let message: RecorderMessage =
            serde_json::from_value(json!({"type": "GET_RECORDING_STATE"})).unwrap();
        assert_eq!(message, RecorderMessage::GetRecordingState);
        assert!(message.expects_response());

        let value = serde_json::to_value(RecorderMessage::StopRecording).unwrap();
        assert_eq!(value, json!({"type": "STOP_RECORDING"}));
    }

    #[test]
    fn test_state_response_shape() {
        let response = RecorderResponse::State(RecordingStateResponse {
            is_recording: true,
            has_recorded_data: false,
            recording_duration: 1200,
            state: RecorderState::Active,
            session_id: None,
        });

        let value = serde_json::to_value(&response).unwrap();
        assert_eq!(value["isRecording"], true);
        assert_eq!(value["recordingDuration"], 1200);
        assert_eq!(value["state"], "active");
        assert!(value.get("sessionId").is_none());
    }

    #[test]
    fn test_failed_ack_carries_error() {
        let value = serde_json::to_value(AckResponse::failed("Recording already in progress")).unwrap();

        assert_eq!(
            value,
            json!({"success": false, "error": "Recording already in progress"})
        );
    }
}
