use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::sink::SurfaceSink;
use crate::error::SurfaceError;
use crate::session::{CaptureOptions, PageMetadata, SessionContext, SurfaceKind, TargetContext};

/// Capture scripts that run inside the recorded page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InjectedScript {
    ConsoleInterceptor,
    DomRecorder,
}

impl InjectedScript {
    pub fn name(&self) -> &'static str {
        match self {
            InjectedScript::ConsoleInterceptor => "console-interceptor",
            InjectedScript::DomRecorder => "dom-recorder",
        }
    }

    pub fn kind(&self) -> SurfaceKind {
        match self {
            InjectedScript::ConsoleInterceptor => SurfaceKind::Console,
            InjectedScript::DomRecorder => SurfaceKind::Dom,
        }
    }

    /// Scripts a session with `options` needs
    pub fn required_by(options: &CaptureOptions) -> Vec<InjectedScript> {
        [InjectedScript::ConsoleInterceptor, InjectedScript::DomRecorder]
            .into_iter()
            .filter(|script| options.enables(script.kind()))
            .collect()
    }
}

impl fmt::Display for InjectedScript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Host facility that runs capture scripts inside a page
#[async_trait]
pub trait ScriptHost: Send + Sync {
    /// Start `script` in the page. The script reports through `sink`.
    async fn inject(
        &self,
        target: &TargetContext,
        script: InjectedScript,
        sink: SurfaceSink,
    ) -> Result<(), SurfaceError>;

    /// Ask `script` to flush anything pending and stop. Called from the
    /// orchestrator loop, so flushed events must be queued with
    /// `SurfaceSink::try_emit` rather than awaited.
    async fn stop(&self, target: &TargetContext, script: InjectedScript) -> Result<(), SurfaceError>;

    async fn describe(&self, target: &TargetContext) -> Result<PageMetadata, SurfaceError>;
}

/// Injects page scripts at most once per target context
pub struct ScriptInjectionAdapter {
    host: Arc<dyn ScriptHost>,
    injected: Mutex<HashSet<(TargetContext, InjectedScript)>>,
}

impl ScriptInjectionAdapter {
    pub fn new(host: Arc<dyn ScriptHost>) -> Self {
        Self {
            host,
            injected: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_injected(&self, target: &TargetContext, script: InjectedScript) -> bool {
        self.injected.lock().contains(&(target.clone(), script))
    }

    /// Inject each script not already present in the target. Stops at the
    /// first failure; scripts injected before it stay registered so they can
    /// be torn down with `stop`.
    pub async fn inject(
        &self,
        ctx: &SessionContext,
        scripts: &[InjectedScript],
        sink: &SurfaceSink,
    ) -> Result<(), SurfaceError> {
        for &script in scripts {
            let key = (ctx.target.clone(), script);
            if !self.injected.lock().insert(key.clone()) {
                debug!("{} already present in {}, skipping", script, ctx.target);
                continue;
            }

            if let Err(e) = self
                .host
                .inject(&ctx.target, script, sink.scoped(ctx.session_id))
                .await
            {
                self.injected.lock().remove(&key);
                return Err(e);
            }
            info!("Injected {} into {}", script, ctx.target);
        }

        Ok(())
    }

    /// Signal every script injected into `target` to flush and stop.
    /// Returns the failures encountered; every script is attempted.
    pub async fn stop(&self, target: &TargetContext) -> Vec<SurfaceError> {
        let scripts: Vec<InjectedScript> = {
            let mut injected = self.injected.lock();
            let scripts = injected
                .iter()
                .filter(|(t, _)| t == target)
                .map(|(_, s)| *s)
                .collect::<Vec<_>>();
            for script in &scripts {
                injected.remove(&(target.clone(), *script));
            }
            scripts
        };

        let results = join_all(scripts.iter().map(|&script| async move {
            (script, self.host.stop(target, script).await)
        }))
        .await;

        results
            .into_iter()
            .filter_map(|(script, result)| match result {
                Ok(()) => None,
                Err(e) => {
                    warn!("Failed to stop {} in {}: {}", script, target, e);
                    Some(e)
                }
            })
            .collect()
    }

    /// Forget injection state after the page navigated away
    pub fn forget_context(&self, target: &TargetContext) {
        self.injected.lock().retain(|(t, _)| t != target);
    }

    pub async fn describe(&self, target: &TargetContext) -> Result<PageMetadata, SurfaceError> {
        self.host.describe(target).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionId;
    use crate::surfaces::simulated::SimulatedScriptHost;
    use tokio::sync::mpsc;

    fn context() -> SessionContext {
        SessionContext {
            session_id: SessionId::new(),
            target: TargetContext::new("tab-3"),
        }
    }

    fn all_scripts() -> Vec<InjectedScript> {
        InjectedScript::required_by(&CaptureOptions::default())
    }

    #[test]
    fn test_required_scripts_follow_options() {
        let options = CaptureOptions {
            capture_dom: false,
            ..CaptureOptions::default()
        };

        assert_eq!(
            InjectedScript::required_by(&options),
            vec![InjectedScript::ConsoleInterceptor]
        );
        assert_eq!(all_scripts().len(), 2);
    }

    #[tokio::test]
    async fn test_reinjection_is_a_no_op() {
        let host = Arc::new(SimulatedScriptHost::new());
        let adapter = ScriptInjectionAdapter::new(host.clone());
        let (tx, _rx) = mpsc::channel(8);
        let sink = SurfaceSink::new(tx);
        let ctx = context();

        adapter.inject(&ctx, &all_scripts(), &sink).await.unwrap();
        adapter.inject(&ctx, &all_scripts(), &sink).await.unwrap();

        assert_eq!(host.injection_count(InjectedScript::ConsoleInterceptor), 1);
        assert_eq!(host.injection_count(InjectedScript::DomRecorder), 1);
    }

    #[tokio::test]
    async fn test_failed_injection_keeps_earlier_scripts_for_teardown() {
        let host = Arc::new(SimulatedScriptHost::new().failing_on(InjectedScript::DomRecorder));
        let adapter = ScriptInjectionAdapter::new(host.clone());
        let (tx, _rx) = mpsc::channel(8);
        let ctx = context();

        let result = adapter.inject(&ctx, &all_scripts(), &SurfaceSink::new(tx)).await;

        assert!(matches!(result, Err(SurfaceError::Injection { .. })));
        assert!(adapter.is_injected(&ctx.target, InjectedScript::ConsoleInterceptor));
        assert!(!adapter.is_injected(&ctx.target, InjectedScript::DomRecorder));

        assert!(adapter.stop(&ctx.target).await.is_empty());
        assert_eq!(host.stop_count(InjectedScript::ConsoleInterceptor), 1);
        assert!(!adapter.is_injected(&ctx.target, InjectedScript::ConsoleInterceptor));
    }

    #[tokio::test]
    async fn test_stop_allows_fresh_injection() {
        let host = Arc::new(SimulatedScriptHost::new());
        let adapter = ScriptInjectionAdapter::new(host.clone());
        let (tx, _rx) = mpsc::channel(8);
        let sink = SurfaceSink::new(tx);
        let ctx = context();

        adapter.inject(&ctx, &all_scripts(), &sink).await.unwrap();
        adapter.stop(&ctx.target).await;
        adapter.inject(&ctx, &all_scripts(), &sink).await.unwrap();

        assert_eq!(host.injection_count(InjectedScript::DomRecorder), 2);
    }

    #[tokio::test]
    async fn test_forget_context() {
        let host = Arc::new(SimulatedScriptHost::new());
        let adapter = ScriptInjectionAdapter::new(host);
        let (tx, _rx) = mpsc::channel(8);
        let ctx = context();

        adapter
            .inject(&ctx, &all_scripts(), &SurfaceSink::new(tx))
            .await
            .unwrap();
        adapter.forget_context(&ctx.target);

        assert!(!adapter.is_injected(&ctx.target, InjectedScript::DomRecorder));
    }
}
