use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::sink::{SurfaceEvent, SurfaceSink};
use crate::error::SurfaceError;
use crate::session::{IngestEvent, NetworkEventPayload, SessionContext, SurfaceKind, TargetContext};

pub const NETWORK_ENABLE_COMMAND: &str = "Network.enable";

/// Signal emitted by an attached debugger
#[derive(Debug, Clone, PartialEq)]
pub enum DebuggerSignal {
    Event { method: String, params: Value },
    Detached { reason: String },
}

/// Host debugging-protocol facility
#[async_trait]
pub trait DebuggerBackend: Send + Sync {
    /// Attach to a target. Protocol events and detach notices arrive on the
    /// returned channel until the debugger detaches.
    async fn attach(
        &self,
        target: &TargetContext,
        protocol_version: &str,
    ) -> Result<mpsc::UnboundedReceiver<DebuggerSignal>, SurfaceError>;

    async fn send_command(
        &self,
        target: &TargetContext,
        method: &str,
        params: Value,
    ) -> Result<Value, SurfaceError>;

    async fn detach(&self, target: &TargetContext) -> Result<(), SurfaceError>;
}

struct Attachment {
    target: TargetContext,
    cancel: CancellationToken,
    detached: Arc<AtomicBool>,
}

/// Network capture surface backed by a debugger attachment
pub struct NetworkCaptureAdapter {
    backend: Arc<dyn DebuggerBackend>,
    protocol_version: String,
    attachment: Mutex<Option<Attachment>>,
}

impl NetworkCaptureAdapter {
    pub fn new(backend: Arc<dyn DebuggerBackend>, protocol_version: impl Into<String>) -> Self {
        Self {
            backend,
            protocol_version: protocol_version.into(),
            attachment: Mutex::new(None),
        }
    }

    pub fn is_attached(&self) -> bool {
        self.attachment.lock().is_some()
    }

    pub async fn start(&self, ctx: &SessionContext, sink: &SurfaceSink) -> Result<(), SurfaceError> {
        let signals = self
            .backend
            .attach(&ctx.target, &self.protocol_version)
            .await?;

        if let Err(e) = self
            .backend
            .send_command(&ctx.target, NETWORK_ENABLE_COMMAND, json!({}))
            .await
        {
            error!("{} failed on {}: {}", NETWORK_ENABLE_COMMAND, ctx.target, e);
            if let Err(detach_err) = self.backend.detach(&ctx.target).await {
                warn!("Failed to detach after enable failure: {}", detach_err);
            }
            return Err(e);
        }

        let cancel = CancellationToken::new();
        let detached = Arc::new(AtomicBool::new(false));
        tokio::spawn(forward_signals(
            signals,
            sink.scoped(ctx.session_id),
            cancel.clone(),
            Arc::clone(&detached),
        ));

        info!(
            "Network capture attached to {} (protocol {})",
            ctx.target, self.protocol_version
        );

        *self.attachment.lock() = Some(Attachment {
            target: ctx.target.clone(),
            cancel,
            detached,
        });

        Ok(())
    }

    /// Detach the debugger. Intentional detaches are not reported as failures.
    /// The forwarder exits on cancellation and is never awaited here, since
    /// it may be blocked on the orchestrator queue that is calling us.
    pub async fn stop(&self) -> Result<(), SurfaceError> {
        let Some(attachment) = self.attachment.lock().take() else {
            return Ok(());
        };

        attachment.cancel.cancel();
        if attachment.detached.load(Ordering::SeqCst) {
            debug!("Debugger on {} already detached", attachment.target);
            return Ok(());
        }

        self.backend.detach(&attachment.target).await
    }
}

async fn forward_signals(
    mut signals: mpsc::UnboundedReceiver<DebuggerSignal>,
    sink: SurfaceSink,
    cancel: CancellationToken,
    detached: Arc<AtomicBool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            signal = signals.recv() => match signal {
                Some(DebuggerSignal::Event { method, params }) => {
                    if !NetworkEventPayload::is_allowed(&method) {
                        trace!("Ignoring debugger event {}", method);
                        continue;
                    }
                    let event = SurfaceEvent::Telemetry(IngestEvent::Network(NetworkEventPayload {
                        method,
                        params,
                    }));
                    if let Err(e) = sink.try_emit(event) {
                        warn!("Dropped network event: {}", e);
                    }
                }
                Some(DebuggerSignal::Detached { reason }) => {
                    detached.store(true, Ordering::SeqCst);
                    if !cancel.is_cancelled() {
                        warn!("Debugger detached unexpectedly: {}", reason);
                        let failure = SurfaceEvent::Failed {
                            surface: SurfaceKind::Network,
                            reason: SurfaceError::Detached { reason }.to_string(),
                        };
                        if let Err(e) = sink.emit(failure).await {
                            error!("Failed to report debugger detach: {}", e);
                        }
                    }
                    break;
                }
                None => {
                    detached.store(true, Ordering::SeqCst);
                    break;
                }
            },
        }
    }
    debug!("Network forwarder stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::Command;
    use crate::session::SessionId;
    use crate::surfaces::simulated::SimulatedDebuggerBackend;
    use tokio::time::{timeout, Duration};

    fn context() -> SessionContext {
        SessionContext {
            session_id: SessionId::new(),
            target: TargetContext::new("tab-9"),
        }
    }

    async fn next_surface_event(rx: &mut mpsc::Receiver<Command>) -> SurfaceEvent {
        match timeout(Duration::from_secs(1), rx.recv()).await.unwrap() {
            Some(Command::Surface(message)) => message.event,
            _ => panic!("Expected surface event"),
        }
    }

    #[tokio::test]
    async fn test_attach_enables_network_domain() {
        let backend = Arc::new(SimulatedDebuggerBackend::new());
        let adapter = NetworkCaptureAdapter::new(backend.clone(), "1.3");
        let (tx, _rx) = mpsc::channel(8);

        adapter.start(&context(), &SurfaceSink::new(tx)).await.unwrap();

        assert!(adapter.is_attached());
        assert_eq!(backend.protocol_version().as_deref(), Some("1.3"));
        assert_eq!(backend.commands(), vec![NETWORK_ENABLE_COMMAND.to_string()]);
    }

    #[tokio::test]
    async fn test_only_allow_listed_events_are_forwarded() {
        let backend = Arc::new(SimulatedDebuggerBackend::new());
        let adapter = NetworkCaptureAdapter::new(backend.clone(), "1.3");
        let (tx, mut rx) = mpsc::channel(8);

        adapter.start(&context(), &SurfaceSink::new(tx)).await.unwrap();
        backend.emit("Network.dataReceived", json!({"requestId": "1"}));
        backend.emit("Network.responseReceived", json!({"requestId": "1"}));

        match next_surface_event(&mut rx).await {
            SurfaceEvent::Telemetry(IngestEvent::Network(payload)) => {
                assert_eq!(payload.method, "Network.responseReceived");
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unexpected_detach_reports_failure() {
        let backend = Arc::new(SimulatedDebuggerBackend::new());
        let adapter = NetworkCaptureAdapter::new(backend.clone(), "1.3");
        let (tx, mut rx) = mpsc::channel(8);

        adapter.start(&context(), &SurfaceSink::new(tx)).await.unwrap();
        backend.detach_unexpectedly("target_closed");

        match next_surface_event(&mut rx).await {
            SurfaceEvent::Failed { surface, reason } => {
                assert_eq!(surface, SurfaceKind::Network);
                assert!(reason.contains("target_closed"));
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_intentional_stop_is_silent() {
        let backend = Arc::new(SimulatedDebuggerBackend::new());
        let adapter = NetworkCaptureAdapter::new(backend.clone(), "1.3");
        let (tx, mut rx) = mpsc::channel(8);
        let sink = SurfaceSink::new(tx);

        adapter.start(&context(), &sink).await.unwrap();
        adapter.stop().await.unwrap();

        assert!(!adapter.is_attached());
        assert!(!backend.is_attached());
        assert!(timeout(Duration::from_millis(50), rx.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_enable_failure_detaches() {
        let backend = Arc::new(SimulatedDebuggerBackend::new().failing_enable());
        let adapter = NetworkCaptureAdapter::new(backend.clone(), "1.3");
        let (tx, _rx) = mpsc::channel(8);

        let result = adapter.start(&context(), &SurfaceSink::new(tx)).await;

        assert!(matches!(result, Err(SurfaceError::Command { .. })));
        assert!(!adapter.is_attached());
        assert!(!backend.is_attached());
    }
}
