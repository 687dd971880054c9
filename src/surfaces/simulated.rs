//! In-process host backends used by the demo CLI and the test suite.

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use super::media::{MediaBackend, StreamHandle};
use super::network::{DebuggerBackend, DebuggerSignal};
use super::scripts::{InjectedScript, ScriptHost};
use super::sink::{SurfaceEvent, SurfaceSink};
use crate::error::SurfaceError;
use crate::session::{ConsoleLogPayload, IngestEvent, PageMetadata, TargetContext};

#[derive(Default)]
struct MediaState {
    next_stream: u64,
    streams: HashSet<String>,
    last_requested_mime: Option<Option<String>>,
    acquires: usize,
}

/// Tab capture that records canned chunks
pub struct SimulatedMediaBackend {
    supported: Option<Vec<String>>,
    chunks: Vec<Bytes>,
    fail_acquire: bool,
    fail_start: bool,
    fail_stop: Option<String>,
    stop_delay: Option<Duration>,
    hang_on_stop: bool,
    state: Mutex<MediaState>,
}

impl Default for SimulatedMediaBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedMediaBackend {
    pub fn new() -> Self {
        Self {
            supported: None,
            chunks: vec![Bytes::from_static(b"\x1aE\xdf\xa3simulated-webm")],
            fail_acquire: false,
            fail_start: false,
            fail_stop: None,
            stop_delay: None,
            hang_on_stop: false,
            state: Mutex::new(MediaState::default()),
        }
    }

    /// Restrict the encodings reported as supported
    pub fn with_supported(mut self, mime_types: &[&str]) -> Self {
        self.supported = Some(mime_types.iter().map(|m| m.to_string()).collect());
        self
    }

    pub fn with_chunks(mut self, chunks: Vec<Bytes>) -> Self {
        self.chunks = chunks;
        self
    }

    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    pub fn failing_acquire(mut self) -> Self {
        self.fail_acquire = true;
        self
    }

    pub fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    pub fn failing_stop(mut self, reason: &str) -> Self {
        self.fail_stop = Some(reason.to_string());
        self
    }

    /// The recorder never returns from stop
    pub fn hanging_on_stop(mut self) -> Self {
        self.hang_on_stop = true;
        self
    }

    pub fn active_streams(&self) -> usize {
        self.state.lock().streams.len()
    }

    pub fn acquire_count(&self) -> usize {
        self.state.lock().acquires
    }

    pub fn last_requested_mime(&self) -> Option<Option<String>> {
        self.state.lock().last_requested_mime.clone()
    }
}

#[async_trait]
impl MediaBackend for SimulatedMediaBackend {
    async fn acquire_stream(&self, target: &TargetContext) -> Result<StreamHandle, SurfaceError> {
        if self.fail_acquire {
            return Err(SurfaceError::Acquire {
                details: "permission denied".to_string(),
            });
        }

        let mut state = self.state.lock();
        state.acquires += 1;
        state.next_stream += 1;
        let stream_id = format!("stream-{}", state.next_stream);
        state.streams.insert(stream_id.clone());

        Ok(StreamHandle {
            stream_id,
            target: target.clone(),
        })
    }

    fn is_type_supported(&self, mime_type: &str) -> bool {
        match &self.supported {
            Some(supported) => supported.iter().any(|m| m == mime_type),
            None => true,
        }
    }

    async fn start_recorder(
        &self,
        _stream: &StreamHandle,
        mime_type: Option<&str>,
        _timeslice: Duration,
    ) -> Result<(), SurfaceError> {
        self.state.lock().last_requested_mime = Some(mime_type.map(str::to_string));
        if self.fail_start {
            return Err(SurfaceError::backend("recorder refused to start"));
        }
        Ok(())
    }

    async fn stop_recorder(&self, _stream: &StreamHandle) -> Result<Vec<Bytes>, SurfaceError> {
        if self.hang_on_stop {
            std::future::pending::<()>().await;
        }
        if let Some(delay) = self.stop_delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(reason) = &self.fail_stop {
            return Err(SurfaceError::backend(reason.clone()));
        }
        Ok(self.chunks.clone())
    }

    async fn release_stream(&self, stream: &StreamHandle) -> Result<(), SurfaceError> {
        self.state.lock().streams.remove(&stream.stream_id);
        Ok(())
    }
}

#[derive(Default)]
struct DebuggerState {
    sender: Option<mpsc::UnboundedSender<DebuggerSignal>>,
    protocol_version: Option<String>,
    commands: Vec<String>,
    detaches: usize,
}

/// Debugger that forwards events injected by the caller
#[derive(Default)]
pub struct SimulatedDebuggerBackend {
    fail_attach: bool,
    fail_enable: bool,
    fail_detach: bool,
    detach_delay: Option<Duration>,
    state: Mutex<DebuggerState>,
}

impl SimulatedDebuggerBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_attach(mut self) -> Self {
        self.fail_attach = true;
        self
    }

    pub fn failing_enable(mut self) -> Self {
        self.fail_enable = true;
        self
    }

    /// The browser refuses to detach and keeps the session attached
    pub fn failing_detach(mut self) -> Self {
        self.fail_detach = true;
        self
    }

    pub fn with_detach_delay(mut self, delay: Duration) -> Self {
        self.detach_delay = Some(delay);
        self
    }

    pub fn is_attached(&self) -> bool {
        self.state.lock().sender.is_some()
    }

    pub fn protocol_version(&self) -> Option<String> {
        self.state.lock().protocol_version.clone()
    }

    pub fn commands(&self) -> Vec<String> {
        self.state.lock().commands.clone()
    }

    pub fn detach_count(&self) -> usize {
        self.state.lock().detaches
    }

    /// Emit a protocol event. Returns false when nothing is attached.
    pub fn emit(&self, method: &str, params: Value) -> bool {
        match &self.state.lock().sender {
            Some(sender) => sender
                .send(DebuggerSignal::Event {
                    method: method.to_string(),
                    params,
                })
                .is_ok(),
            None => false,
        }
    }

    /// Emit the four lifecycle events of one successful request
    pub fn emit_request(&self, request_id: &str, url: &str, status: u16) -> bool {
        self.emit(
            "Network.requestWillBeSent",
            json!({"requestId": request_id, "request": {"url": url, "method": "GET"}}),
        ) && self.emit(
            "Network.responseReceived",
            json!({
                "requestId": request_id,
                "response": {"url": url, "status": status, "mimeType": "application/json"}
            }),
        ) && self.emit(
            "Network.loadingFinished",
            json!({"requestId": request_id, "encodedDataLength": 512}),
        )
    }

    /// Simulate the user or the page closing the debugging session
    pub fn detach_unexpectedly(&self, reason: &str) {
        let mut state = self.state.lock();
        if let Some(sender) = state.sender.take() {
            let _ = sender.send(DebuggerSignal::Detached {
                reason: reason.to_string(),
            });
        }
    }
}

#[async_trait]
impl DebuggerBackend for SimulatedDebuggerBackend {
    async fn attach(
        &self,
        target: &TargetContext,
        protocol_version: &str,
    ) -> Result<mpsc::UnboundedReceiver<DebuggerSignal>, SurfaceError> {
        if self.fail_attach {
            return Err(SurfaceError::Attach {
                details: format!("cannot attach to {}", target),
            });
        }

        let mut state = self.state.lock();
        if state.sender.is_some() {
            return Err(SurfaceError::Attach {
                details: "another debugger is already attached".to_string(),
            });
        }

        let (tx, rx) = mpsc::unbounded_channel();
        state.sender = Some(tx);
        state.protocol_version = Some(protocol_version.to_string());
        Ok(rx)
    }

    async fn send_command(
        &self,
        _target: &TargetContext,
        method: &str,
        _params: Value,
    ) -> Result<Value, SurfaceError> {
        self.state.lock().commands.push(method.to_string());
        if self.fail_enable {
            return Err(SurfaceError::Command {
                command: method.to_string(),
                details: "domain unavailable".to_string(),
            });
        }
        Ok(json!({}))
    }

    async fn detach(&self, target: &TargetContext) -> Result<(), SurfaceError> {
        if let Some(delay) = self.detach_delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        state.detaches += 1;
        if self.fail_detach {
            return Err(SurfaceError::backend(format!("{} refused to detach", target)));
        }
        match state.sender.take() {
            Some(_) => Ok(()),
            None => Err(SurfaceError::backend(format!(
                "debugger not attached to {}",
                target
            ))),
        }
    }
}

#[derive(Default)]
struct PageState {
    sinks: HashMap<InjectedScript, SurfaceSink>,
    pending_dom: Vec<Value>,
    injections: HashMap<InjectedScript, usize>,
    stops: HashMap<InjectedScript, usize>,
}

/// A page that runs the console interceptor and DOM recorder in memory
pub struct SimulatedScriptHost {
    fail_on: Option<InjectedScript>,
    fail_describe: bool,
    metadata: PageMetadata,
    state: Mutex<PageState>,
}

impl Default for SimulatedScriptHost {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedScriptHost {
    pub fn new() -> Self {
        Self {
            fail_on: None,
            fail_describe: false,
            metadata: PageMetadata {
                page_url: "https://app.example.com/checkout".to_string(),
                page_title: "Checkout".to_string(),
                user_agent: "Mozilla/5.0 (X11; Linux x86_64) Simulated".to_string(),
                display_resolution: "1920x1080".to_string(),
            },
            state: Mutex::new(PageState::default()),
        }
    }

    pub fn failing_on(mut self, script: InjectedScript) -> Self {
        self.fail_on = Some(script);
        self
    }

    pub fn failing_describe(mut self) -> Self {
        self.fail_describe = true;
        self
    }

    pub fn with_metadata(mut self, metadata: PageMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn injection_count(&self, script: InjectedScript) -> usize {
        self.state.lock().injections.get(&script).copied().unwrap_or(0)
    }

    pub fn stop_count(&self, script: InjectedScript) -> usize {
        self.state.lock().stops.get(&script).copied().unwrap_or(0)
    }

    /// Report a console call. Returns false when the interceptor is not running.
    pub fn console(&self, level: &str, args: Vec<Value>) -> bool {
        let Some(sink) = self.sink(InjectedScript::ConsoleInterceptor) else {
            return false;
        };
        let payload = ConsoleLogPayload {
            level: level.to_string(),
            args,
            timestamp: chrono::Utc::now().to_rfc3339(),
            url: self.metadata.page_url.clone(),
        };
        sink.try_emit(SurfaceEvent::Telemetry(IngestEvent::Console(payload)))
            .is_ok()
    }

    /// Send a batch of DOM events immediately
    pub fn dom_batch(&self, events: Vec<Value>) -> bool {
        let Some(sink) = self.sink(InjectedScript::DomRecorder) else {
            return false;
        };
        sink.try_emit(SurfaceEvent::Telemetry(IngestEvent::Dom(events)))
            .is_ok()
    }

    /// Hold DOM events in the page until the recorder is asked to stop
    pub fn buffer_dom(&self, events: Vec<Value>) {
        self.state.lock().pending_dom.extend(events);
    }

    fn sink(&self, script: InjectedScript) -> Option<SurfaceSink> {
        self.state.lock().sinks.get(&script).cloned()
    }
}

#[async_trait]
impl ScriptHost for SimulatedScriptHost {
    async fn inject(
        &self,
        target: &TargetContext,
        script: InjectedScript,
        sink: SurfaceSink,
    ) -> Result<(), SurfaceError> {
        if self.fail_on == Some(script) {
            return Err(SurfaceError::Injection {
                script: script.to_string(),
                details: format!("cannot access contents of {}", target),
            });
        }

        let mut state = self.state.lock();
        *state.injections.entry(script).or_insert(0) += 1;
        state.sinks.insert(script, sink);
        Ok(())
    }

    async fn stop(&self, _target: &TargetContext, script: InjectedScript) -> Result<(), SurfaceError> {
        let (sink, pending) = {
            let mut state = self.state.lock();
            *state.stops.entry(script).or_insert(0) += 1;
            let pending = match script {
                InjectedScript::DomRecorder => std::mem::take(&mut state.pending_dom),
                InjectedScript::ConsoleInterceptor => Vec::new(),
            };
            (state.sinks.remove(&script), pending)
        };

        if let (Some(sink), false) = (sink, pending.is_empty()) {
            debug!("Flushing {} buffered DOM events", pending.len());
            sink.try_emit(SurfaceEvent::Telemetry(IngestEvent::Dom(pending)))
                .map_err(|e| SurfaceError::backend(e.to_string()))?;
        }
        Ok(())
    }

    async fn describe(&self, target: &TargetContext) -> Result<PageMetadata, SurfaceError> {
        if self.fail_describe {
            return Err(SurfaceError::backend(format!("{} is not scriptable", target)));
        }
        Ok(self.metadata.clone())
    }
}
