use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::record::{PersistedSessionRecord, RecordSummary};
use crate::error::StorageError;
use crate::session::{
    media_extension, ConsoleLogEntry, DomEventEntry, MediaCapture, NetworkEventEntry, SessionBuffers, SessionId,
};

const INDEX_FILE: &str = "recordings.json";
const RECORD_FILE: &str = "record.json";
const CONSOLE_FILE: &str = "console_logs.json";
const NETWORK_FILE: &str = "network_logs.json";
const DOM_FILE: &str = "dom_events.json";
const MEDIA_STEM: &str = "recording";

/// Durable storage for finished sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a record with its buffers and add it to the recent index
    async fn save(
        &self,
        record: &PersistedSessionRecord,
        buffers: &SessionBuffers,
    ) -> Result<(), StorageError>;

    async fn load_record(&self, id: &SessionId) -> Result<PersistedSessionRecord, StorageError>;

    async fn load_buffers(&self, id: &SessionId) -> Result<SessionBuffers, StorageError>;

    /// Most recent first, bounded by the configured index size
    async fn list_recent(&self) -> Result<Vec<RecordSummary>, StorageError>;

    async fn delete(&self, id: &SessionId) -> Result<(), StorageError>;
}

/// Stores each session under `<root>/recording_<id>/` with a shared index
/// file of recent summaries at `<root>/recordings.json`
pub struct FileSessionStore {
    root: PathBuf,
    max_recent: usize,
    index_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new<P: Into<PathBuf>>(root: P, max_recent: usize) -> Self {
        Self {
            root: root.into(),
            max_recent: max_recent.max(1),
            index_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, id: &SessionId) -> PathBuf {
        self.root.join(id.storage_key())
    }

    /// Path of the stored media file, if the session has one
    pub fn media_path(&self, record: &PersistedSessionRecord) -> Option<PathBuf> {
        record.media_mime_type.as_deref().map(|mime| {
            self.session_dir(&record.id).join(format!(
                "{}.{}",
                MEDIA_STEM,
                media_extension(mime)
            ))
        })
    }

    async fn read_index(&self) -> Result<Vec<RecordSummary>, StorageError> {
        let path = self.root.join(INDEX_FILE);
        match fs::read(&path).await {
            Ok(content) => serde_json::from_slice(&content).map_err(|source| StorageError::Corrupt {
                path: path.display().to_string(),
                source,
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(source) => Err(StorageError::Read {
                path: path.display().to_string(),
                source,
            }),
        }
    }

    async fn write_index(&self, index: &[RecordSummary]) -> Result<(), StorageError> {
        let path = self.root.join(INDEX_FILE);
        let tmp = self.root.join(format!("{}.tmp", INDEX_FILE));
        fs::create_dir_all(&self.root)
            .await
            .map_err(|source| StorageError::Write {
                path: self.root.display().to_string(),
                source,
            })?;
        write_json(&tmp, &index).await?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|source| StorageError::Write {
                path: path.display().to_string(),
                source,
            })
    }

    async fn update_index<F>(&self, update: F) -> Result<(), StorageError>
    where
        F: FnOnce(&mut Vec<RecordSummary>) + Send,
    {
        let _guard = self.index_lock.lock().await;
        let mut index = self.read_index().await?;
        update(&mut index);
        index.truncate(self.max_recent);
        self.write_index(&index).await
    }
}

#[async_trait]
impl SessionStore for FileSessionStore {
    async fn save(
        &self,
        record: &PersistedSessionRecord,
        buffers: &SessionBuffers,
    ) -> Result<(), StorageError> {
        let dir = self.session_dir(&record.id);
        fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::Write {
                path: dir.display().to_string(),
                source,
            })?;

        write_json(&dir.join(CONSOLE_FILE), &buffers.console).await?;
        write_json(&dir.join(NETWORK_FILE), &buffers.network).await?;
        write_json(&dir.join(DOM_FILE), &buffers.dom).await?;

        if let (Some(media), Some(path)) = (
            buffers.media.as_ref().filter(|m| m.size() > 0),
            self.media_path(record),
        ) {
            fs::write(&path, &media.buffer)
                .await
                .map_err(|source| StorageError::Write {
                    path: path.display().to_string(),
                    source,
                })?;
        }

        // The record file marks the session directory as complete
        write_json(&dir.join(RECORD_FILE), record).await?;

        let summary = record.summary();
        self.update_index(move |index| {
            index.retain(|s| s.id != summary.id);
            index.insert(0, summary);
        })
        .await?;

        info!("Persisted session {} to {}", record.id, dir.display());
        Ok(())
    }

    async fn load_record(&self, id: &SessionId) -> Result<PersistedSessionRecord, StorageError> {
        let path = self.session_dir(id).join(RECORD_FILE);
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound { id: id.to_string() });
        }
        read_json(&path).await
    }

    async fn load_buffers(&self, id: &SessionId) -> Result<SessionBuffers, StorageError> {
        let record = self.load_record(id).await?;
        let dir = self.session_dir(id);

        let console: Vec<ConsoleLogEntry> = read_json(&dir.join(CONSOLE_FILE)).await?;
        let network: Vec<NetworkEventEntry> = read_json(&dir.join(NETWORK_FILE)).await?;
        let dom: Vec<DomEventEntry> = read_json(&dir.join(DOM_FILE)).await?;

        let media = match (self.media_path(&record), record.media_mime_type.clone()) {
            (Some(path), Some(mime_type)) => {
                let content = fs::read(&path).await.map_err(|source| StorageError::Read {
                    path: path.display().to_string(),
                    source,
                })?;
                Some(MediaCapture::new(Bytes::from(content), mime_type))
            }
            _ => None,
        };

        Ok(SessionBuffers {
            console,
            network,
            dom,
            media,
        })
    }

    async fn list_recent(&self) -> Result<Vec<RecordSummary>, StorageError> {
        let mut index = self.read_index().await?;
        index.truncate(self.max_recent);
        Ok(index)
    }

    async fn delete(&self, id: &SessionId) -> Result<(), StorageError> {
        let dir = self.session_dir(id);
        let existed = match fs::remove_dir_all(&dir).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => false,
            Err(source) => {
                return Err(StorageError::Write {
                    path: dir.display().to_string(),
                    source,
                })
            }
        };

        let mut indexed = false;
        let target = *id;
        self.update_index(|index| {
            let before = index.len();
            index.retain(|s| s.id != target);
            indexed = index.len() != before;
        })
        .await?;

        if !existed && !indexed {
            return Err(StorageError::NotFound { id: id.to_string() });
        }
        if !existed {
            warn!("Recording {} was indexed but had no directory", id);
        }

        debug!("Deleted recording {}", id);
        Ok(())
    }
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), StorageError> {
    let content = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Write {
        path: path.display().to_string(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    })?;

    fs::write(path, content)
        .await
        .map_err(|source| StorageError::Write {
            path: path.display().to_string(),
            source,
        })
}

async fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StorageError> {
    let content = fs::read(path).await.map_err(|source| StorageError::Read {
        path: path.display().to_string(),
        source,
    })?;

    serde_json::from_slice(&content).map_err(|source| StorageError::Corrupt {
        path: path.display().to_string(),
        source,
    })
}
