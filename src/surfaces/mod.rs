pub mod media;
pub mod network;
pub mod scripts;
pub mod simulated;
mod sink;

use std::sync::Arc;

use crate::config::RecorderConfig;

pub use media::{MediaBackend, MediaCaptureAdapter, StreamHandle, DEFAULT_MIME_TYPE};
pub use network::{DebuggerBackend, DebuggerSignal, NetworkCaptureAdapter, NETWORK_ENABLE_COMMAND};
pub use scripts::{InjectedScript, ScriptHost, ScriptInjectionAdapter};
pub use sink::{SurfaceEvent, SurfaceMessage, SurfaceSink};

/// The three capture surfaces driven by the orchestrator
#[derive(Clone)]
pub struct CaptureSurfaces {
    pub media: Arc<MediaCaptureAdapter>,
    pub network: Arc<NetworkCaptureAdapter>,
    pub scripts: Arc<ScriptInjectionAdapter>,
}

impl CaptureSurfaces {
    pub fn new(
        config: &RecorderConfig,
        media: Arc<dyn MediaBackend>,
        debugger: Arc<dyn DebuggerBackend>,
        scripts: Arc<dyn ScriptHost>,
    ) -> Self {
        Self {
            media: Arc::new(MediaCaptureAdapter::new(
                media,
                config.media.mime_types.clone(),
                config.media_timeslice(),
            )),
            network: Arc::new(NetworkCaptureAdapter::new(
                debugger,
                config.debugger.protocol_version.clone(),
            )),
            scripts: Arc::new(ScriptInjectionAdapter::new(scripts)),
        }
    }
}
