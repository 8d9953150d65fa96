//! Vulnerability probe engine: one target x selected probe definitions.

use std::sync::Arc;

use tracing::debug;

use crate::context::{Context, ProbeMode};
use crate::error::{ExecutionError, FuseResult};
use crate::record::ProbeDefinition;
use crate::result::{ItemResult, ProbeFinding, ResultData};
use crate::source::DefinitionStore;
use crate::task::{ProbeSelection, Task, TaskKind};

use super::{Engine, EngineCore, Executor, HttpProber, ResultStream};

/// Registry name.
pub const NAME: &str = "probe";

/// Methods allowed in verify mode.
const SAFE_METHODS: [&str; 2] = ["GET", "HEAD"];

/// Runs one probe definition against one target.
pub trait ProbeRunner: Send + Sync {
    /// Returns the finding for `definition` on `target`.
    fn run(
        &self,
        target: &str,
        definition: &ProbeDefinition,
        ctx: &Context,
    ) -> Result<ProbeFinding, ExecutionError>;
}

/// Joins a target and a request path; bare hosts get `http://`.
#[must_use]
pub fn probe_url(target: &str, path: &str) -> String {
    let target = target.trim().trim_end_matches('/');
    let path = path.trim().trim_start_matches('/');
    if target.contains("://") {
        format!("{target}/{path}")
    } else {
        format!("http://{target}/{path}")
    }
}

/// Issues the definition's request and checks its matchers against the body.
pub struct HttpProbeRunner {
    prober: Arc<dyn HttpProber>,
}

impl HttpProbeRunner {
    /// Creates a runner over `prober`.
    #[must_use]
    pub fn new(prober: Arc<dyn HttpProber>) -> Self {
        Self { prober }
    }
}

impl ProbeRunner for HttpProbeRunner {
    fn run(
        &self,
        target: &str,
        definition: &ProbeDefinition,
        ctx: &Context,
    ) -> Result<ProbeFinding, ExecutionError> {
        let mut finding = ProbeFinding {
            target: target.to_string(),
            probe_id: definition.id.clone(),
            severity: definition.severity,
            vulnerable: false,
            evidence: Vec::new(),
        };

        let method = definition.request.method.trim().to_ascii_uppercase();
        if ctx.options().probe.mode == ProbeMode::Verify
            && !SAFE_METHODS.contains(&method.as_str())
        {
            debug!(probe = %definition.id, %method, "skipped in verify mode");
            finding
                .evidence
                .push(format!("skipped: {method} not allowed in verify mode"));
            return Ok(finding);
        }

        let url = probe_url(target, &definition.request.path);
        let observation = self
            .prober
            .fetch(&method, &url, ctx.item_timeout(), &ctx.options().http)?;

        let body = observation.body.to_lowercase();
        let matched: Vec<String> = definition
            .matchers
            .iter()
            .filter(|m| !m.trim().is_empty() && body.contains(&m.trim().to_lowercase()))
            .cloned()
            .collect();
        finding.vulnerable =
            !definition.matchers.is_empty() && matched.len() == definition.matchers.len();
        finding.evidence = matched;
        Ok(finding)
    }
}

/// Runs the selected probe definitions against one target.
pub struct ProbeEngine {
    core: EngineCore,
    runner: Arc<dyn ProbeRunner>,
    store: Arc<DefinitionStore>,
}

impl ProbeEngine {
    /// Creates the engine.
    #[must_use]
    pub fn new(runner: Arc<dyn ProbeRunner>, store: Arc<DefinitionStore>) -> Self {
        Self {
            core: EngineCore::new(NAME, &[TaskKind::ProbeExecute]),
            runner,
            store,
        }
    }

    /// The engine's executor.
    #[must_use]
    pub const fn executor(&self) -> &Executor {
        self.core.executor()
    }

    fn resolve(&self, selection: ProbeSelection) -> Result<Vec<ProbeDefinition>, ExecutionError> {
        let (definitions, reason) = match selection {
            ProbeSelection::Definitions(defs) => (defs, "no definitions given"),
            ProbeSelection::Ids(ids) => (
                self.store.probes_by_ids(&ids),
                "none of the requested ids are loaded",
            ),
            ProbeSelection::Fingerprints(names) => (
                self.store.probes_for_fingerprints(&names),
                "no loaded definitions reference these fingerprints",
            ),
        };
        if definitions.is_empty() {
            return Err(ExecutionError::EmptyProbeSet {
                reason: reason.to_string(),
            });
        }
        Ok(definitions)
    }
}

impl Engine for ProbeEngine {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn execute(&self, ctx: &Context, task: Task) -> FuseResult<ResultStream> {
        self.core.admit(&task)?;
        let probe = match task {
            Task::ProbeExecute(probe) => probe,
            Task::Scan(_) | Task::Match(_) | Task::Check(_) | Task::Brute(_) => {
                return Err(self.core.unhandled(task.kind()));
            }
        };
        let definitions = self.resolve(probe.probes)?;
        debug!(host = %probe.target, definitions = definitions.len(), "probe set resolved");

        let target = probe.target.trim().to_string();
        let label_target = target.clone();
        let runner = Arc::clone(&self.runner);
        self.core.executor().spawn_labeled(
            ctx,
            definitions,
            move |definition: &ProbeDefinition| format!("{label_target} [{}]", definition.id),
            move |definition, ctx| {
                ItemResult::from_outcome(
                    runner
                        .run(&target, &definition, ctx)
                        .map(ResultData::Probe),
                )
            },
        )
    }

    fn close(&self) -> FuseResult<()> {
        self.core.close();
        Ok(())
    }
}
