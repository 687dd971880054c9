use thiserror::Error;

use crate::session::SurfaceKind;

#[derive(Error, Debug)]
pub enum RecorderError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Startup failure: {message}")]
    Startup { message: String },

    #[error("Recording already in progress")]
    AlreadyRecording,

    #[error("Surface failure in {surface}: {message}")]
    Surface { surface: SurfaceKind, message: String },

    #[error("Ingestion failure for {kind}: {message}")]
    Ingestion { kind: String, message: String },

    #[error("Finalize failure: {message}")]
    Finalize { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("Orchestrator channel closed")]
    Channel,

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl RecorderError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }

    pub fn startup<S: Into<String>>(message: S) -> Self {
        Self::Startup {
            message: message.into(),
        }
    }

    pub fn surface<S: Into<String>>(surface: SurfaceKind, message: S) -> Self {
        Self::Surface {
            surface,
            message: message.into(),
        }
    }

    pub fn finalize<S: Into<String>>(message: S) -> Self {
        Self::Finalize {
            message: message.into(),
        }
    }

    /// Errors that reject a `start()` call and leave the orchestrator idle
    pub fn is_startup_failure(&self) -> bool {
        matches!(self, Self::Startup { .. } | Self::AlreadyRecording)
    }
}

impl From<SurfaceError> for RecorderError {
    fn from(error: SurfaceError) -> Self {
        Self::Startup {
            message: error.to_string(),
        }
    }
}

/// Failures raised by capture surface adapters and their host backends
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SurfaceError {
    #[error("Failed to acquire media stream: {details}")]
    Acquire { details: String },

    #[error("Failed to attach debugger: {details}")]
    Attach { details: String },

    #[error("Failed to inject {script}: {details}")]
    Injection { script: String, details: String },

    #[error("Protocol command {command} failed: {details}")]
    Command { command: String, details: String },

    #[error("Debugger detached: {reason}")]
    Detached { reason: String },

    #[error("No video data was recorded.")]
    NoData,

    #[error("Backend error: {details}")]
    Backend { details: String },
}

impl SurfaceError {
    pub fn backend<S: Into<String>>(details: S) -> Self {
        Self::Backend {
            details: details.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt record {path}: {source}")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Recording not found: {id}")]
    NotFound { id: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Receiver lagged behind by {skipped} events")]
    Lagged { skipped: u64 },

    #[error("Event bus channel closed")]
    ChannelClosed,
}

pub type Result<T> = std::result::Result<T, RecorderError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_classification() {
        assert!(RecorderError::AlreadyRecording.is_startup_failure());
        assert!(RecorderError::startup("media refused").is_startup_failure());
        assert!(!RecorderError::finalize("disk full").is_startup_failure());
        assert!(!RecorderError::surface(SurfaceKind::Network, "detached").is_startup_failure());
    }

    #[test]
    fn test_surface_error_converts_to_startup() {
        let error: RecorderError = SurfaceError::Attach {
            details: "target closed".to_string(),
        }
        .into();

        assert!(error.is_startup_failure());
        assert!(error.to_string().contains("target closed"));
    }

    #[test]
    fn test_no_data_message() {
        assert_eq!(SurfaceError::NoData.to_string(), "No video data was recorded.");
    }
}
