//! Fingerprint <-> probe-definition association index.
//!
//! Parents are fingerprint names, children are probe-definition ids. The
//! index is derived from a full record batch and swapped in whole under a
//! write lock; there is no incremental insert. Readers always see either the
//! previous or the next complete state.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::info;

use crate::record::ProbeDefinition;

fn normalize_key(s: &str) -> String {
    s.trim().to_ascii_lowercase()
}

/// A record that declares parent keys.
pub trait Associated {
    /// The child identifier.
    fn child_id(&self) -> &str;
    /// Parent keys this child depends on.
    fn parent_keys(&self) -> &[String];
}

impl Associated for ProbeDefinition {
    fn child_id(&self) -> &str {
        &self.id
    }

    fn parent_keys(&self) -> &[String] {
        &self.fingerprints
    }
}

/// Stable digest of an index input batch.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexDigest([u8; 32]);

impl fmt::Debug for IndexDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "IndexDigest({self})")
    }
}

impl fmt::Display for IndexDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0[..8] {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct IndexState {
    forward: HashMap<String, HashSet<String>>,
    reverse: HashMap<String, HashSet<String>>,
    has_child: HashMap<String, bool>,
    digest: Option<IndexDigest>,
}

impl IndexState {
    fn derive<'a, P, R>(parents: P, records: &[R]) -> Self
    where
        P: IntoIterator<Item = &'a str>,
        R: Associated,
    {
        let mut state = Self::default();
        for parent in parents {
            let key = normalize_key(parent);
            if !key.is_empty() {
                state.has_child.entry(key).or_insert(false);
            }
        }

        for record in records {
            let child = record.child_id().trim();
            if child.is_empty() {
                continue;
            }
            for parent in record.parent_keys() {
                let key = normalize_key(parent);
                if key.is_empty() {
                    continue;
                }
                state
                    .forward
                    .entry(key.clone())
                    .or_default()
                    .insert(child.to_string());
                state
                    .reverse
                    .entry(child.to_string())
                    .or_default()
                    .insert(key.clone());
                state.has_child.insert(key, true);
            }
        }
        state
    }
}

fn digest_of<'a, P, R>(parents: P, records: &[R]) -> IndexDigest
where
    P: IntoIterator<Item = &'a str>,
    R: Associated,
{
    let parents: BTreeSet<String> = parents.into_iter().map(normalize_key).collect();
    let mut edges: BTreeSet<(String, String)> = BTreeSet::new();
    for record in records {
        for parent in record.parent_keys() {
            edges.insert((record.child_id().trim().to_string(), normalize_key(parent)));
        }
    }

    let mut hasher = blake3::Hasher::new();
    for p in &parents {
        hasher.update(b"p\0");
        hasher.update(p.as_bytes());
        hasher.update(b"\0");
    }
    for (child, parent) in &edges {
        hasher.update(b"e\0");
        hasher.update(child.as_bytes());
        hasher.update(b"\0");
        hasher.update(parent.as_bytes());
        hasher.update(b"\0");
    }
    IndexDigest(*hasher.finalize().as_bytes())
}

/// Bidirectional parent/child index.
#[derive(Debug, Default)]
pub struct AssociationIndex {
    state: RwLock<Arc<IndexState>>,
}

impl AssociationIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds from child records. Returns false when the batch is identical
    /// to the one the current state was built from.
    pub fn build_from_records<R: Associated>(&self, records: &[R]) -> bool {
        self.build_with_parents(std::iter::empty(), records)
    }

    /// Rebuilds from child records, also registering `parents` that may have
    /// no children (their `has_associated_child` is then false).
    pub fn build_with_parents<'a, P, R>(&self, parents: P, records: &[R]) -> bool
    where
        P: IntoIterator<Item = &'a str> + Clone,
        R: Associated,
    {
        let digest = digest_of(parents.clone(), records);
        if self.snapshot().digest == Some(digest) {
            return false;
        }

        let mut next = IndexState::derive(parents, records);
        next.digest = Some(digest);
        let (parents_n, edges_n) = (
            next.has_child.len(),
            next.forward.values().map(HashSet::len).sum::<usize>(),
        );

        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        *guard = Arc::new(next);
        drop(guard);

        info!(parents = parents_n, edges = edges_n, digest = %digest, "association index rebuilt");
        true
    }

    fn snapshot(&self) -> Arc<IndexState> {
        // The state is only ever replaced whole, so a poisoned lock still
        // guards a complete value.
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Children of `parent`, sorted.
    #[must_use]
    pub fn children_of(&self, parent: &str) -> Vec<String> {
        let state = self.snapshot();
        let mut out: Vec<String> = state
            .forward
            .get(&normalize_key(parent))
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// Parents of `child`, sorted.
    #[must_use]
    pub fn parents_of(&self, child: &str) -> Vec<String> {
        let state = self.snapshot();
        let mut out: Vec<String> = state
            .reverse
            .get(child.trim())
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    /// True if `parent` has at least one child.
    #[must_use]
    pub fn has_associated_child(&self, parent: &str) -> bool {
        self.snapshot()
            .has_child
            .get(&normalize_key(parent))
            .copied()
            .unwrap_or(false)
    }

    /// Number of children of `parent`.
    #[must_use]
    pub fn child_count(&self, parent: &str) -> usize {
        self.snapshot()
            .forward
            .get(&normalize_key(parent))
            .map_or(0, HashSet::len)
    }

    /// Number of parents of `child`.
    #[must_use]
    pub fn parent_count(&self, child: &str) -> usize {
        self.snapshot()
            .reverse
            .get(child.trim())
            .map_or(0, HashSet::len)
    }

    /// Known parents, with or without children.
    #[must_use]
    pub fn parent_len(&self) -> usize {
        self.snapshot().has_child.len()
    }

    /// Every known parent key, sorted.
    #[must_use]
    pub fn parents(&self) -> Vec<String> {
        let mut out: Vec<String> = self.snapshot().has_child.keys().cloned().collect();
        out.sort();
        out
    }

    /// Total parent -> child edges.
    #[must_use]
    pub fn forward_edge_count(&self) -> usize {
        self.snapshot().forward.values().map(HashSet::len).sum()
    }

    /// Total child -> parent edges.
    #[must_use]
    pub fn reverse_edge_count(&self) -> usize {
        self.snapshot().reverse.values().map(HashSet::len).sum()
    }

    /// Forward and reverse edge totals read from one state.
    #[must_use]
    pub fn edge_counts(&self) -> (usize, usize) {
        let state = self.snapshot();
        (
            state.forward.values().map(HashSet::len).sum(),
            state.reverse.values().map(HashSet::len).sum(),
        )
    }

    /// Digest of the batch the current state was built from.
    #[must_use]
    pub fn digest(&self) -> Option<IndexDigest> {
        self.snapshot().digest
    }
}
