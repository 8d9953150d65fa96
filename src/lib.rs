//! # scanfuse
//!
//! One execution contract over four scan/match engines: a TCP port scanner,
//! a fingerprint matcher, a vulnerability-probe runner and an HTTP batch
//! prober.
//!
//! ## Core Concepts
//!
//! - **Engine**: a named capability that turns a [`Task`] into a
//!   [`ResultStream`] of per-item [`ItemResult`]s
//! - **Executor**: bounded worker pool behind every engine, with cooperative
//!   cancellation and blocking delivery
//! - **Filter**: AND/OR predicates selecting which fingerprints and probe
//!   definitions take part in a run, split into local and remote criteria
//! - **AssociationIndex**: fingerprint name to probe definition edges, in
//!   both directions
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scanfuse::{Client, Context, EngineConfig, EngineRegistry, ScanTask};
//!
//! let client = Client::new(Arc::new(EngineRegistry::with_builtin()), EngineConfig::new());
//! let ctx = Context::new().with_threads(50);
//!
//! let task = ScanTask::new("10.0.0.0/30", "22,80,443");
//! let stream = client.execute("portscan", &ctx, task.into())?;
//! for result in stream {
//!     if let Some(port) = result.as_port().filter(|p| p.open) {
//!         println!("{}:{}", port.host, port.port);
//!     }
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod filter;
pub mod index;
pub mod pattern;
pub mod record;
pub mod registry;
pub mod result;
pub mod source;
pub mod targets;
pub mod task;

// Re-export primary types at crate root for convenience
pub use config::{ClientConfig, RemoteConfig};
pub use context::{CancelHandle, Context, EngineOptions, HttpOptions, ProbeMode, ScanOptions};
pub use engine::{Engine, EngineConfig, Executor, ResultStream, RunId, RunStats};
pub use error::{
    ConfigError, ExecutionError, FuseError, FuseResult, TransportError, ValidationError,
};
pub use filter::{AdvancedClause, Filter, FilterPredicate, Filterable, Operator};
pub use index::{Associated, AssociationIndex};
pub use record::{Classification, Fingerprint, ProbeDefinition, Severity};
pub use registry::{Client, EngineFactory, EngineRegistry};
pub use result::{ItemResult, ResultData};
pub use source::{DataSource, DefinitionStore, LocalSource, RemoteSource, Selection};
pub use targets::{Endpoint, TargetSet};
pub use task::{
    BruteTask, CheckTask, MatchTask, ProbeExecuteTask, ProbeSelection, ScanTask, Task, TaskKind,
};
