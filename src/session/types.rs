use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier assigned to a recording session when it is created
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Name of the directory and storage key holding this session's record
    pub fn storage_key(&self) -> String {
        format!("recording_{}", self.0)
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.strip_prefix("recording_").unwrap_or(s);
        Ok(Self(Uuid::parse_str(trimmed)?))
    }
}

/// The kinds of data a session can capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SurfaceKind {
    Media,
    Network,
    Console,
    Dom,
}

impl SurfaceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SurfaceKind::Media => "media",
            SurfaceKind::Network => "network",
            SurfaceKind::Console => "console",
            SurfaceKind::Dom => "dom",
        }
    }
}

impl fmt::Display for SurfaceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which capture surfaces a session enables. Fixed for the life of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureOptions {
    #[serde(default = "enabled")]
    pub capture_video: bool,
    #[serde(default = "enabled")]
    pub capture_dom: bool,
    #[serde(default = "enabled")]
    pub capture_console: bool,
    #[serde(default = "enabled")]
    pub capture_network: bool,
}

fn enabled() -> bool {
    true
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            capture_video: true,
            capture_dom: true,
            capture_console: true,
            capture_network: true,
        }
    }
}

impl CaptureOptions {
    pub fn enables(&self, kind: SurfaceKind) -> bool {
        match kind {
            SurfaceKind::Media => self.capture_video,
            SurfaceKind::Network => self.capture_network,
            SurfaceKind::Console => self.capture_console,
            SurfaceKind::Dom => self.capture_dom,
        }
    }
}

/// Opaque identifier of the page or tab being recorded
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetContext(String);

impl TargetContext {
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Session identity handed to capture surfaces so their output can be tagged
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub target: TargetContext,
}

/// Descriptive page information attached to a session after start
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMetadata {
    pub page_url: String,
    pub page_title: String,
    pub user_agent: String,
    pub display_resolution: String,
}

/// Lifecycle status of a single session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Starting,
    Active,
    Stopping,
    Finalizing,
    Finalized,
    FailedStart,
}

impl SessionStatus {
    /// Whether page and network events may still be appended
    pub fn accepts_events(&self) -> bool {
        matches!(self, SessionStatus::Active | SessionStatus::Stopping)
    }
}
