use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::record::PersistedSessionRecord;
use super::store::SessionStore;
use crate::error::{RecorderError, Result};
use crate::events::{EventBus, RecorderEvent};
use crate::session::FrozenSession;

/// Reason reported for a session that produced neither data nor an error
pub const NO_DATA_REASON: &str = "no data captured";

/// What happened to a finished session
#[derive(Debug, Clone, PartialEq)]
pub struct FinalizeOutcome {
    pub record: PersistedSessionRecord,
    pub persisted: bool,
    pub review_requested: bool,
    /// Terminal error reason reported to listeners
    pub error: Option<String>,
}

/// Turns a frozen session into a persisted record and runs post-stop effects
pub struct SessionFinalizer {
    store: Arc<dyn SessionStore>,
    event_bus: Arc<EventBus>,
    open_review: bool,
}

impl SessionFinalizer {
    pub fn new(store: Arc<dyn SessionStore>, event_bus: Arc<EventBus>, open_review: bool) -> Self {
        Self {
            store,
            event_bus,
            open_review,
        }
    }

    pub fn store(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.store)
    }

    /// Persist `session` when it holds data or an error. A session with
    /// neither is reported with `NO_DATA_REASON` and not stored.
    pub async fn finalize(&self, session: FrozenSession) -> Result<FinalizeOutcome> {
        let record = PersistedSessionRecord::from_session(&session);
        let has_data = session.buffers.has_data();

        if !has_data && session.error.is_none() {
            warn!("Session {} captured no data, not persisting", session.id);
            return Ok(FinalizeOutcome {
                record,
                persisted: false,
                review_requested: false,
                error: Some(NO_DATA_REASON.to_string()),
            });
        }

        self.store
            .save(&record, &session.buffers)
            .await
            .map_err(|e| {
                error!("Failed to persist session {}: {}", session.id, e);
                RecorderError::finalize(e.to_string())
            })?;

        let review_requested = has_data && self.open_review;
        if review_requested {
            let event = RecorderEvent::ReviewRequested {
                session_id: session.id,
            };
            if let Err(e) = self.event_bus.publish(event).await {
                debug!("No listener for review request: {}", e);
            }
        }

        info!(
            "Finalized session {}: video={}, console={}, network={}, dom={}",
            record.id,
            record.has_video,
            record.console_log_count,
            record.network_log_count,
            record.dom_event_count
        );

        Ok(FinalizeOutcome {
            error: session.error,
            record,
            persisted: true,
            review_requested,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StorageError;
    use crate::finalizer::{FileSessionStore, RecordSummary};
    use crate::session::{
        CaptureOptions, ConsoleLogEntry, ConsoleLogPayload, PageMetadata, SessionBuffers,
        SessionId, TargetContext,
    };
    use async_trait::async_trait;
    use chrono::Utc;
    use tempfile::TempDir;
    use tokio::time::{timeout, Duration};

    fn frozen(buffers: SessionBuffers, error: Option<&str>) -> FrozenSession {
        FrozenSession {
            id: SessionId::new(),
            target: TargetContext::new("tab-2"),
            options: CaptureOptions::default(),
            started_at: Utc::now(),
            duration_ms: 900,
            metadata: PageMetadata::default(),
            buffers,
            error: error.map(str::to_string),
        }
    }

    fn console_buffers(count: usize) -> SessionBuffers {
        SessionBuffers {
            console: (0..count)
                .map(|i| ConsoleLogEntry {
                    offset_ms: i as u64,
                    payload: ConsoleLogPayload {
                        level: "log".to_string(),
                        args: vec![],
                        timestamp: "2024-01-01T00:00:00Z".to_string(),
                        url: String::new(),
                    },
                })
                .collect(),
            ..SessionBuffers::default()
        }
    }

    struct FailingStore;

    #[async_trait]
    impl SessionStore for FailingStore {
        async fn save(
            &self,
            _record: &PersistedSessionRecord,
            _buffers: &SessionBuffers,
        ) -> std::result::Result<(), StorageError> {
            Err(StorageError::Write {
                path: "/readonly".to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only"),
            })
        }

        async fn load_record(
            &self,
            id: &SessionId,
        ) -> std::result::Result<PersistedSessionRecord, StorageError> {
            Err(StorageError::NotFound { id: id.to_string() })
        }

        async fn load_buffers(
            &self,
            id: &SessionId,
        ) -> std::result::Result<SessionBuffers, StorageError> {
            Err(StorageError::NotFound { id: id.to_string() })
        }

        async fn list_recent(&self) -> std::result::Result<Vec<RecordSummary>, StorageError> {
            Ok(Vec::new())
        }

        async fn delete(&self, id: &SessionId) -> std::result::Result<(), StorageError> {
            Err(StorageError::NotFound { id: id.to_string() })
        }
    }

    #[tokio::test]
    async fn test_session_with_data_is_persisted_and_reviewed() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileSessionStore::new(temp_dir.path(), 10));
        let event_bus = Arc::new(EventBus::new(10));
        let mut events = event_bus.subscribe();
        let finalizer = SessionFinalizer::new(store.clone(), event_bus, true);

        let session = frozen(console_buffers(3), None);
        let id = session.id;
        let outcome = finalizer.finalize(session).await.unwrap();

        assert!(outcome.persisted);
        assert!(outcome.review_requested);
        assert_eq!(outcome.record.console_log_count, 3);
        assert!(outcome.error.is_none());
        assert_eq!(store.list_recent().await.unwrap().len(), 1);

        let event = timeout(Duration::from_millis(100), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.event_type(), "review_requested");
        assert_eq!(event.session_id(), id);
    }

    #[tokio::test]
    async fn test_error_only_session_is_stored_without_review() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileSessionStore::new(temp_dir.path(), 10));
        let finalizer = SessionFinalizer::new(store.clone(), Arc::new(EventBus::new(10)), true);

        let outcome = finalizer
            .finalize(frozen(SessionBuffers::default(), Some("Debugger detached: target_closed")))
            .await
            .unwrap();

        assert!(outcome.persisted);
        assert!(!outcome.review_requested);
        let stored = store.load_record(&outcome.record.id).await.unwrap();
        assert_eq!(stored.error.as_deref(), Some("Debugger detached: target_closed"));
    }

    #[tokio::test]
    async fn test_empty_session_is_not_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileSessionStore::new(temp_dir.path(), 10));
        let finalizer = SessionFinalizer::new(store.clone(), Arc::new(EventBus::new(10)), true);

        let outcome = finalizer
            .finalize(frozen(SessionBuffers::default(), None))
            .await
            .unwrap();

        assert!(!outcome.persisted);
        assert!(!outcome.review_requested);
        assert_eq!(outcome.error.as_deref(), Some(NO_DATA_REASON));
        assert!(store.list_recent().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_review_disabled_by_config() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(FileSessionStore::new(temp_dir.path(), 10));
        let finalizer = SessionFinalizer::new(store, Arc::new(EventBus::new(10)), false);

        let outcome = finalizer.finalize(frozen(console_buffers(1), None)).await.unwrap();

        assert!(outcome.persisted);
        assert!(!outcome.review_requested);
    }

    #[tokio::test]
    async fn test_store_failure_is_a_finalize_error() {
        let finalizer =
            SessionFinalizer::new(Arc::new(FailingStore), Arc::new(EventBus::new(10)), true);

        let result = finalizer.finalize(frozen(console_buffers(1), None)).await;

        assert!(matches!(result, Err(RecorderError::Finalize { .. })));
    }
}
