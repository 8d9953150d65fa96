//! Engines and the execution contract they share.
//!
//! An [`Engine`] accepts a [`Task`] and a [`Context`], validates the task up
//! front and returns a [`ResultStream`] fed by the worker-pool
//! [`Executor`]. Work that touches the network is delegated to collaborator
//! traits (`PortProber`, `FingerprintMatcher`, `ProbeRunner`, `HttpProber`)
//! so tests can substitute them.

pub mod executor;
pub mod fingerprint;
pub mod http;
pub mod portscan;
pub mod probe;
pub mod stream;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::context::Context;
use crate::error::{ExecutionError, FuseError, FuseResult, ValidationError};
use crate::source::DefinitionStore;
use crate::task::{Task, TaskKind};

pub use executor::Executor;
pub use fingerprint::{FingerprintEngine, FingerprintMatcher, KeywordMatcher};
pub use http::{HttpEngine, HttpProber, ReqwestProber};
pub use portscan::{PortProber, PortScanEngine, TcpConnectProber};
pub use probe::{HttpProbeRunner, ProbeEngine, ProbeRunner};
pub use stream::{ResultStream, RunId, RunStats};

/// A named scan/match capability.
pub trait Engine: Send + Sync {
    /// Registry name.
    fn name(&self) -> &str;

    /// Validates `task` and starts the run.
    ///
    /// Validation, configuration and closed-engine errors are returned here,
    /// before any worker starts. Per-item failures arrive on the stream.
    fn execute(&self, ctx: &Context, task: Task) -> FuseResult<ResultStream>;

    /// Marks the engine closed. Runs already started continue.
    fn close(&self) -> FuseResult<()>;
}

/// Lifecycle and executor shared by the built-in engines.
#[derive(Debug)]
pub(crate) struct EngineCore {
    name: &'static str,
    accepts: &'static [TaskKind],
    closed: AtomicBool,
    executor: Executor,
}

impl EngineCore {
    pub(crate) fn new(name: &'static str, accepts: &'static [TaskKind]) -> Self {
        Self {
            name,
            accepts,
            closed: AtomicBool::new(false),
            executor: Executor::new(name),
        }
    }

    pub(crate) const fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) const fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Rejects closed engines, foreign task kinds and invalid payloads.
    pub(crate) fn admit(&self, task: &Task) -> FuseResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(ExecutionError::EngineClosed {
                engine: self.name.to_string(),
            }
            .into());
        }
        if !self.accepts.contains(&task.kind()) {
            return Err(ValidationError::UnsupportedTask {
                engine: self.name.to_string(),
                task: task.kind(),
            }
            .into());
        }
        task.validate()?;
        debug!(engine = self.name, kind = %task.kind(), "task admitted");
        Ok(())
    }

    /// Error for a task that passed admission but has no handler.
    pub(crate) fn unhandled(&self, kind: TaskKind) -> FuseError {
        FuseError::internal(format!("{} admitted a {kind} task", self.name))
    }

    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!(engine = self.name, "engine closed");
        }
    }
}

/// Collaborators and shared state handed to engine factories.
///
/// Unset collaborators fall back to the default adapters.
#[derive(Clone, Default)]
pub struct EngineConfig {
    store: Arc<DefinitionStore>,
    port_prober: Option<Arc<dyn PortProber>>,
    matcher: Option<Arc<dyn FingerprintMatcher>>,
    probe_runner: Option<Arc<dyn ProbeRunner>>,
    http_prober: Option<Arc<dyn HttpProber>>,
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("fingerprints", &self.store.fingerprints().len())
            .field("probes", &self.store.probes().len())
            .field("port_prober", &self.port_prober.is_some())
            .field("matcher", &self.matcher.is_some())
            .field("probe_runner", &self.probe_runner.is_some())
            .field("http_prober", &self.http_prober.is_some())
            .finish()
    }
}

impl EngineConfig {
    /// Default collaborators and an empty definition store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `store` for fingerprints, definitions and the association index.
    #[must_use]
    pub fn with_store(mut self, store: Arc<DefinitionStore>) -> Self {
        self.store = store;
        self
    }

    /// Overrides the port prober.
    #[must_use]
    pub fn with_port_prober(mut self, prober: Arc<dyn PortProber>) -> Self {
        self.port_prober = Some(prober);
        self
    }

    /// Overrides the fingerprint matcher.
    #[must_use]
    pub fn with_matcher(mut self, matcher: Arc<dyn FingerprintMatcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    /// Overrides the probe runner.
    #[must_use]
    pub fn with_probe_runner(mut self, runner: Arc<dyn ProbeRunner>) -> Self {
        self.probe_runner = Some(runner);
        self
    }

    /// Overrides the HTTP prober.
    #[must_use]
    pub fn with_http_prober(mut self, prober: Arc<dyn HttpProber>) -> Self {
        self.http_prober = Some(prober);
        self
    }

    /// The definition store.
    #[must_use]
    pub fn store(&self) -> Arc<DefinitionStore> {
        Arc::clone(&self.store)
    }

    /// The configured port prober or a [`TcpConnectProber`].
    #[must_use]
    pub fn port_prober(&self) -> Arc<dyn PortProber> {
        self.port_prober
            .clone()
            .unwrap_or_else(|| Arc::new(TcpConnectProber))
    }

    /// The configured matcher or a [`KeywordMatcher`].
    #[must_use]
    pub fn matcher(&self) -> Arc<dyn FingerprintMatcher> {
        self.matcher.clone().unwrap_or_else(|| Arc::new(KeywordMatcher))
    }

    /// The configured HTTP prober or a new [`ReqwestProber`].
    pub fn http_prober(&self) -> FuseResult<Arc<dyn HttpProber>> {
        match &self.http_prober {
            Some(p) => Ok(Arc::clone(p)),
            None => Ok(Arc::new(ReqwestProber::new()?)),
        }
    }

    /// The configured probe runner or an [`HttpProbeRunner`] over
    /// [`EngineConfig::http_prober`].
    pub fn probe_runner(&self) -> FuseResult<Arc<dyn ProbeRunner>> {
        match &self.probe_runner {
            Some(r) => Ok(Arc::clone(r)),
            None => Ok(Arc::new(HttpProbeRunner::new(self.http_prober()?))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{CheckTask, MatchTask, ScanTask};

    #[test]
    fn admit_checks_kind_then_payload() {
        let core = EngineCore::new("portscan", &[TaskKind::Scan]);
        let err = core.admit(&MatchTask::new(b"x".to_vec()).into()).unwrap_err();
        assert!(err.is_validation());
        assert!(format!("{err}").contains("does not accept match"));
        assert!(matches!(
            err,
            FuseError::Validation(ValidationError::UnsupportedTask {
                task: TaskKind::Match,
                ..
            })
        ));

        let err = core.admit(&ScanTask::new("", "80").into()).unwrap_err();
        assert!(format!("{err}").contains("IP"));

        assert!(core.admit(&ScanTask::new("127.0.0.1", "80").into()).is_ok());
    }

    #[test]
    fn closed_core_rejects_everything() {
        let core = EngineCore::new("http", &[TaskKind::Check, TaskKind::Brute]);
        core.close();
        core.close();
        let err = core.admit(&CheckTask::new(["http://a"]).into()).unwrap_err();
        assert!(matches!(
            err,
            crate::error::FuseError::Execution(ExecutionError::EngineClosed { .. })
        ));
    }

    #[test]
    fn config_falls_back_to_default_collaborators() {
        let config = EngineConfig::new();
        let _ = config.port_prober();
        let _ = config.matcher();
        assert!(config.store().fingerprints().is_empty());
    }
}
