//! Predicate filter over fingerprints and probe definitions.
//!
//! A [`FilterPredicate`] is an aggregate of optional constraints. Inside a
//! list constraint values are OR'ed; across constraints everything is
//! AND'ed, and a [`Filter`] is the conjunction of its predicates. An empty
//! predicate is the identity filter. Adding a constraint can only shrink the
//! result set.
//!
//! Some criteria can only be evaluated by the remote export API (status,
//! time bounds, pagination). They are carried here so that a remote source
//! can forward them, and ignored by local evaluation. `sources` is both.

mod clause;
mod fields;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::index::AssociationIndex;
use crate::record::Severity;

pub use clause::{AdvancedClause, FieldValue, Operator, KNOWN_FIELDS};
pub use fields::Filterable;

fn eq_ci(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

fn any_of(wanted: &[String], have: &[String]) -> bool {
    wanted.is_empty() || wanted.iter().any(|w| have.iter().any(|h| eq_ci(w, h)))
}

fn one_of(wanted: &[String], have: Option<&str>) -> bool {
    if wanted.is_empty() {
        return true;
    }
    have.is_some_and(|h| wanted.iter().any(|w| eq_ci(w, h)))
}

fn in_range(min: Option<f64>, max: Option<f64>, value: Option<f64>) -> bool {
    if min.is_none() && max.is_none() {
        return true;
    }
    let Some(v) = value else {
        return false;
    };
    min.map_or(true, |lo| v >= lo) && max.map_or(true, |hi| v <= hi)
}

fn active(s: Option<&String>) -> Option<String> {
    s.map(|s| s.trim().to_lowercase()).filter(|s| !s.is_empty())
}

fn fuzzy(needle: Option<&String>, ids: Option<&[String]>) -> bool {
    let Some(needle) = active(needle) else {
        return true;
    };
    ids.is_some_and(|ids| ids.iter().any(|id| id.to_lowercase().contains(&needle)))
}

fn tighter_upper(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

fn check_range(name: &str, min: Option<f64>, max: Option<f64>) -> Result<(), ValidationError> {
    for v in [min, max].into_iter().flatten() {
        if !v.is_finite() {
            return Err(ValidationError::InvalidFilter {
                reason: format!("{name} bound must be finite"),
            });
        }
    }
    if let (Some(lo), Some(hi)) = (min, max) {
        if lo > hi {
            return Err(ValidationError::InvalidFilter {
                reason: format!("{name} range is empty ({lo} > {hi})"),
            });
        }
    }
    Ok(())
}

/// Aggregate of optional constraints.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterPredicate {
    /// Case-insensitive substring over the record's text fields.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keyword: Option<String>,
    /// Any of these tags.
    pub tags: Vec<String>,
    /// Any of these sources (also sent to the remote API).
    pub sources: Vec<String>,
    /// Any of these authors.
    pub authors: Vec<String>,
    /// Any of these vendors.
    pub vendors: Vec<String>,
    /// Any of these severities.
    pub severities: Vec<Severity>,
    /// Minimum classification score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_score: Option<f64>,
    /// Maximum classification score.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_score: Option<f64>,
    /// Minimum classification percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_percentile: Option<f64>,
    /// Maximum classification percentile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_percentile: Option<f64>,
    /// Substring of any CVE id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cve: Option<String>,
    /// Substring of any CWE id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cwe: Option<String>,
    /// Require (or exclude) records that take part in an association.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub has_association: Option<bool>,
    /// Advanced clauses.
    pub advanced: Vec<AdvancedClause>,

    /// Publication status (remote only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Created at or after (remote only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_after: Option<DateTime<Utc>>,
    /// Created at or before (remote only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_before: Option<DateTime<Utc>>,
    /// Updated at or after (remote only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_after: Option<DateTime<Utc>>,
    /// Updated at or before (remote only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_before: Option<DateTime<Utc>>,
    /// Page number, 1-based (remote only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Page size (remote only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
    /// Result cap (remote only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl FilterPredicate {
    /// The identity predicate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the keyword.
    #[must_use]
    pub fn with_keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    /// Adds accepted tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Adds accepted sources.
    #[must_use]
    pub fn with_sources<I, S>(mut self, sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sources.extend(sources.into_iter().map(Into::into));
        self
    }

    /// Adds accepted authors.
    #[must_use]
    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors.extend(authors.into_iter().map(Into::into));
        self
    }

    /// Adds accepted vendors.
    #[must_use]
    pub fn with_vendors<I, S>(mut self, vendors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.vendors.extend(vendors.into_iter().map(Into::into));
        self
    }

    /// Adds accepted severities.
    #[must_use]
    pub fn with_severities(mut self, severities: impl IntoIterator<Item = Severity>) -> Self {
        self.severities.extend(severities);
        self
    }

    /// Sets the score range.
    #[must_use]
    pub fn with_score_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_score = min;
        self.max_score = max;
        self
    }

    /// Sets the percentile range.
    #[must_use]
    pub fn with_percentile_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_percentile = min;
        self.max_percentile = max;
        self
    }

    /// Sets the CVE substring.
    #[must_use]
    pub fn with_cve(mut self, cve: impl Into<String>) -> Self {
        self.cve = Some(cve.into());
        self
    }

    /// Sets the CWE substring.
    #[must_use]
    pub fn with_cwe(mut self, cwe: impl Into<String>) -> Self {
        self.cwe = Some(cwe.into());
        self
    }

    /// Requires (true) or excludes (false) associated records.
    #[must_use]
    pub const fn with_association(mut self, required: bool) -> Self {
        self.has_association = Some(required);
        self
    }

    /// Adds an advanced clause.
    #[must_use]
    pub fn with_clause(mut self, clause: AdvancedClause) -> Self {
        self.advanced.push(clause);
        self
    }

    /// Sets the remote status criterion.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Sets the remote creation-time bounds.
    #[must_use]
    pub const fn with_created_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.created_after = after;
        self.created_before = before;
        self
    }

    /// Sets the remote update-time bounds.
    #[must_use]
    pub const fn with_updated_between(
        mut self,
        after: Option<DateTime<Utc>>,
        before: Option<DateTime<Utc>>,
    ) -> Self {
        self.updated_after = after;
        self.updated_before = before;
        self
    }

    /// Requests one page from the remote API.
    #[must_use]
    pub const fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    /// Caps the number of remote results.
    #[must_use]
    pub const fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }

    /// True when no locally evaluated constraint is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        active(self.keyword.as_ref()).is_none()
            && self.tags.is_empty()
            && self.sources.is_empty()
            && self.authors.is_empty()
            && self.vendors.is_empty()
            && self.severities.is_empty()
            && self.min_score.is_none()
            && self.max_score.is_none()
            && self.min_percentile.is_none()
            && self.max_percentile.is_none()
            && active(self.cve.as_ref()).is_none()
            && active(self.cwe.as_ref()).is_none()
            && self.has_association.is_none()
            && self.advanced.is_empty()
    }

    /// True when a criterion must be delegated to the remote source.
    #[must_use]
    pub fn has_remote_criteria(&self) -> bool {
        self.status.as_deref().is_some_and(|s| !s.trim().is_empty())
            || !self.sources.is_empty()
            || self.created_after.is_some()
            || self.created_before.is_some()
            || self.updated_after.is_some()
            || self.updated_before.is_some()
            || self.page.is_some()
            || self.page_size.is_some()
            || self.limit.is_some()
    }

    /// Checks ranges, pagination and advanced clauses.
    pub fn validate(&self) -> Result<(), ValidationError> {
        check_range("score", self.min_score, self.max_score)?;
        check_range("percentile", self.min_percentile, self.max_percentile)?;

        for (name, v) in [
            ("page", self.page),
            ("page_size", self.page_size),
            ("limit", self.limit),
        ] {
            if v == Some(0) {
                return Err(ValidationError::InvalidFilter {
                    reason: format!("{name} must be at least 1"),
                });
            }
        }
        for (name, lo, hi) in [
            ("created", self.created_after, self.created_before),
            ("updated", self.updated_after, self.updated_before),
        ] {
            if let (Some(lo), Some(hi)) = (lo, hi) {
                if lo > hi {
                    return Err(ValidationError::InvalidFilter {
                        reason: format!("{name} time window is empty"),
                    });
                }
            }
        }

        for clause in &self.advanced {
            clause.validate()?;
        }
        Ok(())
    }

    /// Evaluates every local constraint against `record`.
    #[must_use]
    pub fn matches<T: Filterable + ?Sized>(
        &self,
        record: &T,
        index: Option<&AssociationIndex>,
    ) -> bool {
        if let Some(keyword) = active(self.keyword.as_ref()) {
            if !record
                .keyword_text()
                .iter()
                .any(|t| t.to_lowercase().contains(&keyword))
            {
                return false;
            }
        }

        let classification = record.classification();
        let hit = any_of(&self.tags, record.tags())
            && one_of(&self.sources, record.source())
            && one_of(&self.authors, record.author())
            && one_of(&self.vendors, record.vendor())
            && (self.severities.is_empty()
                || record.severity().is_some_and(|s| self.severities.contains(&s)))
            && in_range(self.min_score, self.max_score, classification.and_then(|c| c.score))
            && in_range(
                self.min_percentile,
                self.max_percentile,
                classification.and_then(|c| c.percentile),
            )
            && fuzzy(self.cve.as_ref(), classification.map(|c| c.cve_ids.as_slice()))
            && fuzzy(self.cwe.as_ref(), classification.map(|c| c.cwe_ids.as_slice()));
        if !hit {
            return false;
        }

        if let Some(want) = self.has_association {
            if record.association(index) != Some(want) {
                return false;
            }
        }

        self.advanced
            .iter()
            .all(|clause| clause.evaluate(record.field(&clause.field)))
    }
}

/// Conjunction of predicates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter {
    predicates: Vec<FilterPredicate>,
}

impl From<FilterPredicate> for Filter {
    fn from(p: FilterPredicate) -> Self {
        Self::new(p)
    }
}

impl Filter {
    /// A filter with one predicate.
    #[must_use]
    pub fn new(predicate: FilterPredicate) -> Self {
        Self {
            predicates: vec![predicate],
        }
    }

    /// The identity filter.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Adds a predicate to the conjunction.
    #[must_use]
    pub fn and(mut self, predicate: FilterPredicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    /// The predicates, in insertion order.
    #[must_use]
    pub fn predicates(&self) -> &[FilterPredicate] {
        &self.predicates
    }

    /// Folds the forwardable criteria of every predicate into one.
    ///
    /// Statuses and explicit pages must agree (see [`Filter::validate`]),
    /// sources intersect, time windows narrow to the tightest bounds and the
    /// smallest limit wins. Keyword and tags come from the first predicate
    /// that sets them; local evaluation still applies the rest.
    #[must_use]
    pub fn remote_criteria(&self) -> FilterPredicate {
        let mut merged = FilterPredicate::new();
        let mut sources: Option<Vec<String>> = None;

        for p in &self.predicates {
            if merged.keyword.is_none() {
                merged.keyword = active(p.keyword.as_ref()).and(p.keyword.clone());
            }
            if merged.tags.is_empty() {
                merged.tags.clone_from(&p.tags);
            }
            if !p.sources.is_empty() {
                sources = Some(match sources {
                    None => p.sources.clone(),
                    Some(prev) => prev
                        .into_iter()
                        .filter(|s| p.sources.iter().any(|o| eq_ci(s, o)))
                        .collect(),
                });
            }
            if merged.status.is_none() {
                merged.status = active(p.status.as_ref()).and(p.status.clone());
            }
            merged.created_after = merged.created_after.max(p.created_after);
            merged.updated_after = merged.updated_after.max(p.updated_after);
            merged.created_before = tighter_upper(merged.created_before, p.created_before);
            merged.updated_before = tighter_upper(merged.updated_before, p.updated_before);
            if merged.page.is_none() && merged.page_size.is_none() {
                merged.page = p.page;
                merged.page_size = p.page_size;
            }
            merged.limit = match (merged.limit, p.limit) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
        }

        merged.sources = sources.unwrap_or_default();
        merged
    }

    /// True when no predicate has a local constraint.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.predicates.iter().all(FilterPredicate::is_empty)
    }

    /// True when any predicate has remote criteria.
    #[must_use]
    pub fn has_remote_criteria(&self) -> bool {
        self.predicates.iter().any(FilterPredicate::has_remote_criteria)
    }

    /// Validates every predicate, then rejects remote criteria that cannot
    /// be forwarded together.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.predicates.iter().try_for_each(FilterPredicate::validate)?;

        let mut status: Option<String> = None;
        let mut page: Option<(Option<u32>, Option<u32>)> = None;
        for p in &self.predicates {
            if let Some(next) = active(p.status.as_ref()) {
                if let Some(prev) = status.as_ref().filter(|prev| **prev != next) {
                    return Err(ValidationError::InvalidFilter {
                        reason: format!("conflicting status criteria '{prev}' and '{next}'"),
                    });
                }
                status = Some(next);
            }
            if p.page.is_some() || p.page_size.is_some() {
                let next = (p.page, p.page_size);
                if page.is_some_and(|prev| prev != next) {
                    return Err(ValidationError::InvalidFilter {
                        reason: "more than one predicate requests a page".to_string(),
                    });
                }
                page = Some(next);
            }
        }

        self.remote_criteria().validate()
    }

    /// True when every predicate matches.
    #[must_use]
    pub fn matches<T: Filterable + ?Sized>(
        &self,
        record: &T,
        index: Option<&AssociationIndex>,
    ) -> bool {
        self.predicates.iter().all(|p| p.matches(record, index))
    }

    /// Keeps the matching records, preserving order.
    #[must_use]
    pub fn apply<T: Filterable>(&self, records: Vec<T>) -> Vec<T> {
        self.apply_with_index(records, None)
    }

    /// Like [`Filter::apply`], resolving association constraints through `index`.
    #[must_use]
    pub fn apply_with_index<T: Filterable>(
        &self,
        mut records: Vec<T>,
        index: Option<&AssociationIndex>,
    ) -> Vec<T> {
        if self.is_empty() {
            return records;
        }
        records.retain(|r| self.matches(r, index));
        records
    }
}
