//! Engine registry and the caching client.
//!
//! The registry is an explicit value built once at startup and handed to a
//! [`Client`]; there is no process-global table. Registering a name twice is a
//! configuration error, not something to retry.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, info, warn};

use crate::context::Context;
use crate::engine::{
    fingerprint, http, portscan, probe, Engine, EngineConfig, FingerprintEngine, HttpEngine,
    PortScanEngine, ProbeEngine, ResultStream,
};
use crate::error::{ConfigError, FuseResult};
use crate::task::Task;

/// Builds an engine from shared configuration.
pub type EngineFactory = Arc<dyn Fn(&EngineConfig) -> FuseResult<Arc<dyn Engine>> + Send + Sync>;

/// Name-keyed engine factories.
#[derive(Default)]
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
}

impl fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("engines", &self.names())
            .finish()
    }
}

impl EngineRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding the four built-in engines.
    #[must_use]
    pub fn with_builtin() -> Self {
        let mut factories: HashMap<String, EngineFactory> = HashMap::new();
        let builtin: [(&str, EngineFactory); 4] = [
            (
                portscan::NAME,
                Arc::new(|config: &EngineConfig| -> FuseResult<Arc<dyn Engine>> {
                    Ok(Arc::new(PortScanEngine::new(config.port_prober())))
                }),
            ),
            (
                fingerprint::NAME,
                Arc::new(|config: &EngineConfig| -> FuseResult<Arc<dyn Engine>> {
                    Ok(Arc::new(FingerprintEngine::new(config.matcher(), config.store())))
                }),
            ),
            (
                probe::NAME,
                Arc::new(|config: &EngineConfig| -> FuseResult<Arc<dyn Engine>> {
                    Ok(Arc::new(ProbeEngine::new(config.probe_runner()?, config.store())))
                }),
            ),
            (
                http::NAME,
                Arc::new(|config: &EngineConfig| -> FuseResult<Arc<dyn Engine>> {
                    Ok(Arc::new(HttpEngine::new(config.http_prober()?)))
                }),
            ),
        ];
        for (name, factory) in builtin {
            factories.insert(name.to_string(), factory);
        }
        Self { factories }
    }

    /// Registers `factory` under `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), ConfigError>
    where
        F: Fn(&EngineConfig) -> FuseResult<Arc<dyn Engine>> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "engine.name".to_string(),
                reason: "engine name must not be empty".to_string(),
            });
        }
        if self.factories.contains_key(&name) {
            return Err(ConfigError::DuplicateEngine { name });
        }
        debug!(engine = %name, "engine registered");
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Removes a registration. Only meant for test isolation.
    #[doc(hidden)]
    pub fn unregister(&mut self, name: &str) -> bool {
        self.factories.remove(name).is_some()
    }

    /// Whether `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.keys().cloned().collect();
        names.sort();
        names
    }

    /// Builds a fresh engine.
    pub fn create(&self, name: &str, config: &EngineConfig) -> FuseResult<Arc<dyn Engine>> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEngine {
                name: name.to_string(),
                available: self.names(),
            })?;
        factory(config)
    }
}

/// Lazily builds and caches one engine per name.
pub struct Client {
    registry: Arc<EngineRegistry>,
    config: EngineConfig,
    engines: RwLock<HashMap<String, Arc<dyn Engine>>>,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("registry", &self.registry)
            .field("cached", &self.cached())
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a client over `registry`.
    #[must_use]
    pub fn new(registry: Arc<EngineRegistry>, config: EngineConfig) -> Self {
        Self {
            registry,
            config,
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// The registry.
    #[must_use]
    pub fn registry(&self) -> &EngineRegistry {
        &self.registry
    }

    /// The configuration handed to factories.
    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Names of engines built so far, sorted.
    #[must_use]
    pub fn cached(&self) -> Vec<String> {
        let guard = self.engines.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = guard.keys().cloned().collect();
        names.sort();
        names
    }

    /// Returns the cached engine for `name`, building it on first use.
    pub fn engine(&self, name: &str) -> FuseResult<Arc<dyn Engine>> {
        if let Some(engine) = self
            .engines
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return Ok(Arc::clone(engine));
        }

        let mut guard = self.engines.write().unwrap_or_else(PoisonError::into_inner);
        // Another caller may have built it between the two locks.
        if let Some(engine) = guard.get(name) {
            return Ok(Arc::clone(engine));
        }
        let engine = self.registry.create(name, &self.config)?;
        guard.insert(name.to_string(), Arc::clone(&engine));
        info!(engine = name, "engine constructed");
        Ok(engine)
    }

    /// Runs `task` on the engine named `name`.
    pub fn execute(&self, name: &str, ctx: &Context, task: Task) -> FuseResult<ResultStream> {
        self.engine(name)?.execute(ctx, task)
    }

    /// Closes every cached engine and empties the cache.
    ///
    /// Every engine is closed even if an earlier one fails; the first error
    /// is returned.
    pub fn close(&self) -> FuseResult<()> {
        let engines: Vec<(String, Arc<dyn Engine>)> = self
            .engines
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();

        let mut first = None;
        for (name, engine) in engines {
            if let Err(e) = engine.close() {
                warn!(engine = %name, error = %e, "engine close failed");
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}
