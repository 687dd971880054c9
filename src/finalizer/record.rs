use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::session::{FrozenSession, SessionId};

/// Durable description of a finished session. Stored next to its buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedSessionRecord {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub target_context_id: String,
    pub page_url: String,
    pub page_title: String,
    pub user_agent: String,
    pub display_resolution: String,
    pub has_video: bool,
    pub has_dom: bool,
    pub console_log_count: usize,
    pub network_log_count: usize,
    pub dom_event_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_size: Option<usize>,
    #[serde(default)]
    pub error: Option<String>,
}

impl PersistedSessionRecord {
    pub fn from_session(session: &FrozenSession) -> Self {
        let counts = session.buffers.counts();
        let media = session.buffers.media.as_ref().filter(|m| m.size() > 0);

        Self {
            id: session.id,
            started_at: session.started_at,
            duration_ms: session.duration_ms,
            target_context_id: session.target.id().to_string(),
            page_url: session.metadata.page_url.clone(),
            page_title: session.metadata.page_title.clone(),
            user_agent: session.metadata.user_agent.clone(),
            display_resolution: session.metadata.display_resolution.clone(),
            has_video: counts.has_video,
            has_dom: counts.dom > 0,
            console_log_count: counts.console,
            network_log_count: counts.network,
            dom_event_count: counts.dom,
            media_mime_type: media.map(|m| m.mime_type.clone()),
            media_size: media.map(|m| m.size()),
            error: session.error.clone(),
        }
    }

    pub fn has_data(&self) -> bool {
        self.has_video
            || self.console_log_count > 0
            || self.network_log_count > 0
            || self.dom_event_count > 0
    }

    pub fn summary(&self) -> RecordSummary {
        RecordSummary {
            id: self.id,
            started_at: self.started_at,
            duration_ms: self.duration_ms,
            page_url: self.page_url.clone(),
            page_title: self.page_title.clone(),
            has_video: self.has_video,
            has_dom: self.has_dom,
            console_log_count: self.console_log_count,
            network_log_count: self.network_log_count,
            error: self.error.clone(),
        }
    }
}

/// Entry in the bounded list of recent recordings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSummary {
    pub id: SessionId,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub page_url: String,
    pub page_title: String,
    pub has_video: bool,
    pub has_dom: bool,
    pub console_log_count: usize,
    pub network_log_count: usize,
    #[serde(default)]
    pub error: Option<String>,
}

impl RecordSummary {
    pub fn has_data(&self) -> bool {
        self.has_video || self.has_dom || self.console_log_count > 0 || self.network_log_count > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{CaptureOptions, PageMetadata, SessionBuffers, TargetContext};
    use bytes::Bytes;

    fn frozen(buffers: SessionBuffers, error: Option<&str>) -> FrozenSession {
        FrozenSession {
            id: SessionId::new(),
            target: TargetContext::new("tab-4"),
            options: CaptureOptions::default(),
            started_at: Utc::now(),
            duration_ms: 1500,
            metadata: PageMetadata {
                page_url: "https://example.com/".to_string(),
                page_title: "Example".to_string(),
                user_agent: "agent".to_string(),
                display_resolution: "1280x720".to_string(),
            },
            buffers,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn test_record_counts_and_media() {
        let mut buffers = SessionBuffers::default();
        buffers.media = Some(crate::session::MediaCapture::new(
            Bytes::from_static(b"1234"),
            "video/webm",
        ));

        let record = PersistedSessionRecord::from_session(&frozen(buffers, None));

        assert!(record.has_video);
        assert!(!record.has_dom);
        assert_eq!(record.media_size, Some(4));
        assert_eq!(record.media_mime_type.as_deref(), Some("video/webm"));
        assert!(record.has_data());
        assert!(record.summary().has_data());
    }

    #[test]
    fn test_error_only_record_has_no_data() {
        let record = PersistedSessionRecord::from_session(&frozen(
            SessionBuffers::default(),
            Some("debugger detached"),
        ));

        assert!(!record.has_data());
        assert_eq!(record.summary().error.as_deref(), Some("debugger detached"));
    }

    #[test]
    fn test_record_uses_camel_case_fields() {
        let record = PersistedSessionRecord::from_session(&frozen(SessionBuffers::default(), None));
        let value = serde_json::to_value(&record).unwrap();

        assert!(value.get("consoleLogCount").is_some());
        assert!(value.get("displayResolution").is_some());
        assert!(value.get("mediaMimeType").is_none());
    }
}
