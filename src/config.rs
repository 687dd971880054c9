use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::session::CaptureOptions;

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct RecorderConfig {
    pub capture: CaptureConfig,
    pub media: MediaConfig,
    pub debugger: DebuggerConfig,
    pub storage: StorageConfig,
    pub system: SystemConfig,
}

/// Default capture toggles applied when a start request carries no options
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct CaptureConfig {
    #[serde(default = "default_enabled")]
    pub video: bool,

    #[serde(default = "default_enabled")]
    pub dom: bool,

    #[serde(default = "default_enabled")]
    pub console: bool,

    #[serde(default = "default_enabled")]
    pub network: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct MediaConfig {
    /// Encodings tried in order until the recorder accepts one
    #[serde(default = "default_mime_types")]
    pub mime_types: Vec<String>,

    /// Interval at which the recorder flushes encoded chunks
    #[serde(default = "default_timeslice_ms")]
    pub timeslice_ms: u64,

    /// How long a stop waits for the encoded buffer before finalizing without it
    #[serde(default = "default_result_timeout_seconds")]
    pub result_timeout_seconds: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct DebuggerConfig {
    #[serde(default = "default_protocol_version")]
    pub protocol_version: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct StorageConfig {
    /// Directory holding persisted session records
    #[serde(default = "default_storage_path")]
    pub path: String,

    /// Number of summaries kept in the recent-recordings index
    #[serde(default = "default_max_recent_records")]
    pub max_recent_records: usize,

    /// Request the review view after persisting a session with data
    #[serde(default = "default_enabled")]
    pub open_review_on_finalize: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
pub struct SystemConfig {
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,

    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,
}

impl RecorderConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("bugrecorder.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            .set_default("capture.video", default_enabled())?
            .set_default("capture.dom", default_enabled())?
            .set_default("capture.console", default_enabled())?
            .set_default("capture.network", default_enabled())?
            .set_default("media.mime_types", default_mime_types())?
            .set_default("media.timeslice_ms", default_timeslice_ms() as i64)?
            .set_default(
                "media.result_timeout_seconds",
                default_result_timeout_seconds() as i64,
            )?
            .set_default("debugger.protocol_version", default_protocol_version())?
            .set_default("storage.path", default_storage_path())?
            .set_default(
                "storage.max_recent_records",
                default_max_recent_records() as i64,
            )?
            .set_default("storage.open_review_on_finalize", default_enabled())?
            .set_default(
                "system.command_queue_capacity",
                default_command_queue_capacity() as i64,
            )?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .add_source(File::with_name(&path_str).required(false))
            // BUGRECORDER_STORAGE__MAX_RECENT_RECORDS=5
            .add_source(
                Environment::with_prefix("BUGRECORDER")
                    .prefix_separator("_")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("media.mime_types")
                    .try_parsing(true),
            )
            .build()?;

        let config: RecorderConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.media.mime_types.is_empty() {
            return Err(ConfigError::Message(
                "Media mime_types must list at least one encoding".to_string(),
            ));
        }

        if self.media.mime_types.iter().any(|m| m.trim().is_empty()) {
            return Err(ConfigError::Message(
                "Media mime_types must not contain empty entries".to_string(),
            ));
        }

        if self.media.timeslice_ms == 0 {
            return Err(ConfigError::Message(
                "Media timeslice_ms must be greater than 0".to_string(),
            ));
        }

        if self.media.result_timeout_seconds == 0 {
            return Err(ConfigError::Message(
                "Media result_timeout_seconds must be greater than 0".to_string(),
            ));
        }

        if self.debugger.protocol_version.trim().is_empty() {
            return Err(ConfigError::Message(
                "Debugger protocol_version must be set".to_string(),
            ));
        }

        if self.storage.path.trim().is_empty() {
            return Err(ConfigError::Message("Storage path must be set".to_string()));
        }

        if self.storage.max_recent_records == 0 {
            return Err(ConfigError::Message(
                "Storage max_recent_records must be greater than 0".to_string(),
            ));
        }

        if self.system.command_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Command queue capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn default_capture_options(&self) -> CaptureOptions {
        CaptureOptions {
            capture_video: self.capture.video,
            capture_dom: self.capture.dom,
            capture_console: self.capture.console,
            capture_network: self.capture.network,
        }
    }

    pub fn media_result_timeout(&self) -> Duration {
        Duration::from_secs(self.media.result_timeout_seconds)
    }

    pub fn media_timeslice(&self) -> Duration {
        Duration::from_millis(self.media.timeslice_ms)
    }

    pub fn storage_path(&self) -> PathBuf {
        PathBuf::from(&self.storage.path)
    }
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            capture: CaptureConfig {
                video: default_enabled(),
                dom: default_enabled(),
                console: default_enabled(),
                network: default_enabled(),
            },
            media: MediaConfig {
                mime_types: default_mime_types(),
                timeslice_ms: default_timeslice_ms(),
                result_timeout_seconds: default_result_timeout_seconds(),
            },
            debugger: DebuggerConfig {
                protocol_version: default_protocol_version(),
            },
            storage: StorageConfig {
                path: default_storage_path(),
                max_recent_records: default_max_recent_records(),
                open_review_on_finalize: default_enabled(),
            },
            system: SystemConfig {
                command_queue_capacity: default_command_queue_capacity(),
                event_bus_capacity: default_event_bus_capacity(),
            },
        }
    }
}

// Default value functions
fn default_enabled() -> bool {
    true
}

fn default_mime_types() -> Vec<String> {
    vec![
        "video/webm;codecs=vp9,opus".to_string(),
        "video/webm;codecs=vp8,opus".to_string(),
        "video/webm".to_string(),
    ]
}
fn default_timeslice_ms() -> u64 {
    1000
}
fn default_result_timeout_seconds() -> u64 {
    30
}

fn default_protocol_version() -> String {
    "1.3".to_string()
}

fn default_storage_path() -> String {
    "./recordings".to_string()
}
fn default_max_recent_records() -> usize {
    20
}

fn default_command_queue_capacity() -> usize {
    1024
}
fn default_event_bus_capacity() -> usize {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = RecorderConfig::default();

        assert!(config.validate().is_ok());
        assert_eq!(config.debugger.protocol_version, "1.3");
        assert_eq!(config.media.mime_types.len(), 3);
        assert_eq!(config.default_capture_options(), CaptureOptions::default());
    }

    #[test]
    fn test_load_from_file_overrides_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("recorder.toml");
        fs::write(
            &path,
            r#"
[capture]
video = false

[media]
mime_types = ["video/mp4"]
result_timeout_seconds = 5

[storage]
path = "/tmp/bug-recordings"
max_recent_records = 3
"#,
        )
        .unwrap();

        let config = RecorderConfig::load_from_file(&path).unwrap();

        assert!(!config.capture.video);
        assert!(config.capture.dom);
        assert_eq!(config.media.mime_types, vec!["video/mp4".to_string()]);
        assert_eq!(config.media_result_timeout(), Duration::from_secs(5));
        assert_eq!(config.media.timeslice_ms, 1000);
        assert_eq!(config.storage.max_recent_records, 3);
        assert!(!config.default_capture_options().capture_video);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let config = RecorderConfig::load_from_file(temp_dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.storage.path, "./recordings");
        assert_eq!(config.system.command_queue_capacity, 1024);
    }

    #[test]
    fn test_config_validation() {
        let mut config = RecorderConfig::default();

        config.media.result_timeout_seconds = 0;
        assert!(config.validate().is_err());
        config.media.result_timeout_seconds = 30;

        config.media.mime_types.push(" ".to_string());
        assert!(config.validate().is_err());
        config.media.mime_types.pop();

        config.storage.max_recent_records = 0;
        assert!(config.validate().is_err());
        config.storage.max_recent_records = 10;

        assert!(config.validate().is_ok());
    }
}
