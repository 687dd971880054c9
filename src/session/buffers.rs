use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Console call as reported by the in-page interceptor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsoleLogPayload {
    pub level: String,
    #[serde(default)]
    pub args: Vec<Value>,
    pub timestamp: String,
    #[serde(default)]
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsoleLogEntry {
    /// Milliseconds since the session became active
    pub offset_ms: u64,
    #[serde(flatten)]
    pub payload: ConsoleLogPayload,
}

/// Debugging-protocol events retained in the network buffer
pub const NETWORK_EVENT_ALLOW_LIST: [&str; 4] = [
    "Network.requestWillBeSent",
    "Network.responseReceived",
    "Network.loadingFinished",
    "Network.loadingFailed",
];

/// Debugging-protocol network event forwarded by the network surface
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkEventPayload {
    pub method: String,
    #[serde(default)]
    pub params: Value,
}

impl NetworkEventPayload {
    pub fn is_allowed(method: &str) -> bool {
        NETWORK_EVENT_ALLOW_LIST.contains(&method)
    }

    pub fn request_id(&self) -> Option<&str> {
        self.params.get("requestId").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEventEntry {
    pub offset_ms: u64,
    #[serde(flatten)]
    pub payload: NetworkEventPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomEventEntry {
    pub offset_ms: u64,
    pub event: Value,
}

/// Encoded recording delivered by the media surface after it stops
#[derive(Debug, Clone, PartialEq)]
pub struct MediaCapture {
    pub buffer: Bytes,
    pub mime_type: String,
}

impl MediaCapture {
    pub fn new(buffer: Bytes, mime_type: impl Into<String>) -> Self {
        Self {
            buffer,
            mime_type: mime_type.into(),
        }
    }

    pub fn size(&self) -> usize {
        self.buffer.len()
    }

    pub fn file_extension(&self) -> &'static str {
        media_extension(&self.mime_type)
    }
}

/// File extension for an encoded media MIME type
pub fn media_extension(mime_type: &str) -> &'static str {
    let base = mime_type.split(';').next().unwrap_or_default().trim();
    match base {
        "video/webm" | "audio/webm" => "webm",
        "video/mp4" => "mp4",
        "video/x-matroska" => "mkv",
        _ => "bin",
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BufferCounts {
    pub console: usize,
    pub network: usize,
    pub dom: usize,
    pub has_video: bool,
}

/// Append-only per-session telemetry buffers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionBuffers {
    pub console: Vec<ConsoleLogEntry>,
    pub network: Vec<NetworkEventEntry>,
    pub dom: Vec<DomEventEntry>,
    pub media: Option<MediaCapture>,
}

impl SessionBuffers {
    pub fn has_data(&self) -> bool {
        self.media.as_ref().is_some_and(|m| m.size() > 0)
            || !self.console.is_empty()
            || !self.network.is_empty()
            || !self.dom.is_empty()
    }

    pub fn counts(&self) -> BufferCounts {
        BufferCounts {
            console: self.console.len(),
            network: self.network.len(),
            dom: self.dom.len(),
            has_video: self.media.as_ref().is_some_and(|m| m.size() > 0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_empty_buffers_have_no_data() {
        let mut buffers = SessionBuffers::default();
        assert!(!buffers.has_data());

        buffers.media = Some(MediaCapture::new(Bytes::new(), "video/webm"));
        assert!(!buffers.has_data(), "zero-length media is not data");

        buffers.dom.push(DomEventEntry {
            offset_ms: 0,
            event: json!({"type": 2}),
        });
        assert!(buffers.has_data());
        assert_eq!(buffers.counts().dom, 1);
        assert!(!buffers.counts().has_video);
    }

    #[test]
    fn test_extension_from_mime_with_codecs() {
        assert_eq!(media_extension("video/webm;codecs=vp9,opus"), "webm");
        assert_eq!(media_extension("video/mp4"), "mp4");
        assert_eq!(media_extension("application/octet-stream"), "bin");
    }

    #[test]
    fn test_console_entry_flattens_payload() {
        let entry = ConsoleLogEntry {
            offset_ms: 42,
            payload: ConsoleLogPayload {
                level: "error".to_string(),
                args: vec![json!("boom")],
                timestamp: "2024-01-01T00:00:00Z".to_string(),
                url: "https://example.com".to_string(),
            },
        };

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["offsetMs"], 42);
        assert_eq!(value["level"], "error");
        assert_eq!(value["args"][0], "boom");
    }

    #[test]
    fn test_network_request_id() {
        let payload = NetworkEventPayload {
            method: "Network.requestWillBeSent".to_string(),
            params: json!({"requestId": "1000.1"}),
        };
        assert_eq!(payload.request_id(), Some("1000.1"));
        assert!(NetworkEventPayload::is_allowed(&payload.method));
        assert!(!NetworkEventPayload::is_allowed("Network.dataReceived"));
    }
}
