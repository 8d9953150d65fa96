//! Fingerprint and probe-definition sources.
//!
//! A [`DataSource`] hands back candidate records; the [`DefinitionStore`]
//! owns the loaded working set and its association index.

mod local;
mod query;
mod remote;
mod store;
mod transport;

use crate::error::FuseResult;
use crate::record::{Fingerprint, ProbeDefinition};

pub use local::{LocalSource, FINGERPRINTS_FILE, PROBES_FILE};
pub use query::ExportQuery;
pub use remote::{ExportKind, ExportPage, RemoteSource};
pub use store::{DefinitionStore, ReloadStats, Selection};
pub use transport::{HttpReply, HttpRequest, HttpTransport, ReqwestTransport};

/// Supplies fingerprints and probe definitions.
///
/// Implementations apply what they can of the query (a remote API filters
/// server-side); local predicate evaluation is the caller's job.
pub trait DataSource: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Fingerprints matching `query`.
    fn fingerprints(&self, query: &ExportQuery) -> FuseResult<Vec<Fingerprint>>;

    /// Probe definitions matching `query`.
    fn probes(&self, query: &ExportQuery) -> FuseResult<Vec<ProbeDefinition>>;
}
