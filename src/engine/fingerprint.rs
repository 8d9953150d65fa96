//! Fingerprint engine: matches raw response bytes against the loaded
//! fingerprint set.

use std::sync::Arc;

use tracing::debug;

use crate::context::Context;
use crate::error::FuseResult;
use crate::pattern::cached_regex;
use crate::record::Fingerprint;
use crate::result::{FingerprintHit, ItemResult, ResultData};
use crate::source::DefinitionStore;
use crate::task::{Task, TaskKind};

use super::{Engine, EngineCore, Executor, ResultStream};

/// Registry name.
pub const NAME: &str = "fingerprint";

/// Decides whether one fingerprint matches a response.
pub trait FingerprintMatcher: Send + Sync {
    /// Returns the evidence when `fingerprint` matches `response`.
    fn matches(&self, fingerprint: &Fingerprint, response: &str) -> Option<String>;
}

/// All keywords present (case-insensitive), or any regex pattern matching.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordMatcher;

impl FingerprintMatcher for KeywordMatcher {
    fn matches(&self, fingerprint: &Fingerprint, response: &str) -> Option<String> {
        let keywords: Vec<&str> = fingerprint
            .keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect();
        if !keywords.is_empty() {
            let haystack = response.to_lowercase();
            if keywords
                .iter()
                .all(|k| haystack.contains(&k.to_lowercase()))
            {
                return Some(keywords.join(" & "));
            }
        }

        for pattern in &fingerprint.patterns {
            match cached_regex(pattern) {
                Ok(re) => {
                    if let Some(m) = re.find(response) {
                        return Some(m.as_str().to_string());
                    }
                }
                Err(e) => {
                    debug!(fingerprint = %fingerprint.id, error = %e, "skipping invalid pattern");
                }
            }
        }
        None
    }
}

/// Matches one response against every fingerprint in the store.
pub struct FingerprintEngine {
    core: EngineCore,
    matcher: Arc<dyn FingerprintMatcher>,
    store: Arc<DefinitionStore>,
}

impl FingerprintEngine {
    /// Creates the engine.
    #[must_use]
    pub fn new(matcher: Arc<dyn FingerprintMatcher>, store: Arc<DefinitionStore>) -> Self {
        Self {
            core: EngineCore::new(NAME, &[TaskKind::Match]),
            matcher,
            store,
        }
    }

    /// The engine's executor.
    #[must_use]
    pub const fn executor(&self) -> &Executor {
        self.core.executor()
    }
}

impl Engine for FingerprintEngine {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn execute(&self, ctx: &Context, task: Task) -> FuseResult<ResultStream> {
        self.core.admit(&task)?;
        let m = match task {
            Task::Match(m) => m,
            Task::Scan(_) | Task::ProbeExecute(_) | Task::Check(_) | Task::Brute(_) => {
                return Err(self.core.unhandled(task.kind()));
            }
        };

        let matcher = Arc::clone(&self.matcher);
        let fingerprints = self.store.fingerprints();
        // One work item per task: the whole set is matched against one response.
        self.core
            .executor()
            .spawn_labeled(
                ctx,
                std::iter::once(m.raw),
                |raw: &Vec<u8>| format!("{} response bytes", raw.len()),
                move |raw, ctx| {
                    let response = String::from_utf8_lossy(&raw);
                    let mut hits = Vec::new();
                    for fp in fingerprints.iter() {
                        if ctx.is_cancelled() {
                            break;
                        }
                        if let Some(evidence) = matcher.matches(fp, &response) {
                            hits.push(FingerprintHit {
                                id: fp.id.clone(),
                                name: fp.name.clone(),
                                evidence,
                            });
                        }
                    }
                    ItemResult::ok(ResultData::Match(hits))
                },
            )
    }

    fn close(&self) -> FuseResult<()> {
        self.core.close();
        Ok(())
    }
}
