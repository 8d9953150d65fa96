use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::FuseResult;
use crate::filter::Filter;
use crate::index::AssociationIndex;
use crate::record::{Fingerprint, ProbeDefinition};

use super::query::ExportQuery;
use super::DataSource;

/// Filters selecting the working set on reload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Selection {
    /// Applied to fingerprints.
    pub fingerprints: Filter,
    /// Applied to probe definitions.
    pub probes: Filter,
}

/// Outcome of a reload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReloadStats {
    /// Fingerprints fetched from the source.
    pub fingerprints_fetched: usize,
    /// Probe definitions fetched from the source.
    pub probes_fetched: usize,
    /// Fingerprints kept after filtering.
    pub fingerprints: usize,
    /// Probe definitions kept after filtering.
    pub probes: usize,
    /// Whether the association index was rebuilt.
    pub index_rebuilt: bool,
}

#[derive(Debug, Default)]
struct WorkingSet {
    fingerprints: Arc<Vec<Fingerprint>>,
    probes: Arc<Vec<ProbeDefinition>>,
}

/// The loaded fingerprints and probe definitions plus their association index.
///
/// The index covers every fetched record; the working set is what survives
/// the selection filters.
#[derive(Debug, Default)]
pub struct DefinitionStore {
    set: RwLock<WorkingSet>,
    index: AssociationIndex,
}

impl DefinitionStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store holding exactly `fingerprints` and `probes`.
    #[must_use]
    pub fn from_records(fingerprints: Vec<Fingerprint>, probes: Vec<ProbeDefinition>) -> Self {
        let store = Self::new();
        store.replace(fingerprints, probes);
        store
    }

    /// Replaces the working set unfiltered. Returns whether the index changed.
    pub fn replace(&self, fingerprints: Vec<Fingerprint>, probes: Vec<ProbeDefinition>) -> bool {
        let rebuilt = self.rebuild_index(&fingerprints, &probes);
        self.swap(fingerprints, probes);
        rebuilt
    }

    /// Fetches from `source`, rebuilds the index when the fetched batch
    /// changed and keeps the records `selection` matches.
    pub fn reload(
        &self,
        source: &dyn DataSource,
        selection: &Selection,
    ) -> FuseResult<ReloadStats> {
        selection.fingerprints.validate()?;
        selection.probes.validate()?;

        let fingerprints = source.fingerprints(&ExportQuery::from_filter(&selection.fingerprints))?;
        let probes = source.probes(&ExportQuery::from_filter(&selection.probes))?;
        let (fingerprints_fetched, probes_fetched) = (fingerprints.len(), probes.len());

        let index_rebuilt = self.rebuild_index(&fingerprints, &probes);
        let fingerprints = selection
            .fingerprints
            .apply_with_index(fingerprints, Some(&self.index));
        let probes = selection.probes.apply_with_index(probes, Some(&self.index));

        let stats = ReloadStats {
            fingerprints_fetched,
            probes_fetched,
            fingerprints: fingerprints.len(),
            probes: probes.len(),
            index_rebuilt,
        };
        self.swap(fingerprints, probes);
        info!(
            source = source.name(),
            fingerprints = stats.fingerprints,
            probes = stats.probes,
            index_rebuilt,
            "definition store reloaded"
        );
        Ok(stats)
    }

    fn rebuild_index(&self, fingerprints: &[Fingerprint], probes: &[ProbeDefinition]) -> bool {
        self.index
            .build_with_parents(fingerprints.iter().map(|f| f.name.as_str()), probes)
    }

    fn swap(&self, fingerprints: Vec<Fingerprint>, probes: Vec<ProbeDefinition>) {
        let mut guard = self.set.write().unwrap_or_else(PoisonError::into_inner);
        *guard = WorkingSet {
            fingerprints: Arc::new(fingerprints),
            probes: Arc::new(probes),
        };
    }

    /// The current fingerprints.
    #[must_use]
    pub fn fingerprints(&self) -> Arc<Vec<Fingerprint>> {
        Arc::clone(&self.set.read().unwrap_or_else(PoisonError::into_inner).fingerprints)
    }

    /// The current probe definitions.
    #[must_use]
    pub fn probes(&self) -> Arc<Vec<ProbeDefinition>> {
        Arc::clone(&self.set.read().unwrap_or_else(PoisonError::into_inner).probes)
    }

    /// The association index.
    #[must_use]
    pub const fn index(&self) -> &AssociationIndex {
        &self.index
    }

    /// Definitions with the given ids, in request order. Unknown ids are skipped.
    #[must_use]
    pub fn probes_by_ids(&self, ids: &[String]) -> Vec<ProbeDefinition> {
        let probes = self.probes();
        let mut seen = HashSet::new();
        ids.iter()
            .map(|id| id.trim())
            .filter(|id| seen.insert(*id))
            .filter_map(|id| probes.iter().find(|p| p.id == id).cloned())
            .collect()
    }

    /// Definitions associated with any of `names`, in working-set order.
    #[must_use]
    pub fn probes_for_fingerprints(&self, names: &[String]) -> Vec<ProbeDefinition> {
        let wanted: HashSet<String> = names
            .iter()
            .flat_map(|name| self.index.children_of(name))
            .collect();
        self.probes()
            .iter()
            .filter(|p| wanted.contains(p.id.trim()))
            .cloned()
            .collect()
    }
}
