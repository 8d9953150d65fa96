use std::fs;
use std::path::Path;

use serde::de::DeserializeOwned;
use tracing::info;

use crate::error::{ConfigError, FuseResult};
use crate::record::{Fingerprint, ProbeDefinition};

use super::query::ExportQuery;
use super::DataSource;

/// File name of the fingerprint set inside a data directory.
pub const FINGERPRINTS_FILE: &str = "fingerprints.json";

/// File name of the probe-definition set inside a data directory.
pub const PROBES_FILE: &str = "probes.json";

fn read_json<T: DeserializeOwned>(path: &Path) -> FuseResult<Vec<T>> {
    let raw = fs::read(path).map_err(|e| ConfigError::InvalidValue {
        key: path.display().to_string(),
        reason: e.to_string(),
    })?;
    let records = serde_json::from_slice(&raw).map_err(|e| ConfigError::InvalidValue {
        key: path.display().to_string(),
        reason: format!("invalid JSON: {e}"),
    })?;
    Ok(records)
}

fn read_optional<T: DeserializeOwned>(dir: &Path, name: &str) -> FuseResult<Vec<T>> {
    let path = dir.join(name);
    if path.is_file() {
        read_json(&path)
    } else {
        Ok(Vec::new())
    }
}

/// In-memory record set, optionally loaded from JSON files.
///
/// Remote-only criteria in the query (status, time bounds, pagination) are
/// ignored; every record is returned and local filtering happens in the
/// caller.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LocalSource {
    fingerprints: Vec<Fingerprint>,
    probes: Vec<ProbeDefinition>,
}

impl LocalSource {
    /// A source over the given records.
    #[must_use]
    pub fn new(fingerprints: Vec<Fingerprint>, probes: Vec<ProbeDefinition>) -> Self {
        Self {
            fingerprints,
            probes,
        }
    }

    /// Loads two JSON arrays of records.
    pub fn from_files(fingerprints: &Path, probes: &Path) -> FuseResult<Self> {
        let source = Self::new(read_json(fingerprints)?, read_json(probes)?);
        info!(
            fingerprints = source.fingerprints.len(),
            probes = source.probes.len(),
            "local definitions loaded"
        );
        Ok(source)
    }

    /// Loads `fingerprints.json` and `probes.json` from `dir`. A missing file
    /// counts as an empty set.
    pub fn from_dir(dir: &Path) -> FuseResult<Self> {
        let fingerprints: Vec<Fingerprint> = read_optional(dir, FINGERPRINTS_FILE)?;
        let probes: Vec<ProbeDefinition> = read_optional(dir, PROBES_FILE)?;
        info!(
            dir = %dir.display(),
            fingerprints = fingerprints.len(),
            probes = probes.len(),
            "local definitions loaded"
        );
        Ok(Self::new(fingerprints, probes))
    }
}

impl DataSource for LocalSource {
    fn name(&self) -> &str {
        "local"
    }

    fn fingerprints(&self, _query: &ExportQuery) -> FuseResult<Vec<Fingerprint>> {
        Ok(self.fingerprints.clone())
    }

    fn probes(&self, _query: &ExportQuery) -> FuseResult<Vec<ProbeDefinition>> {
        Ok(self.probes.clone())
    }
}
