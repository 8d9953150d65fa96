use chrono::{DateTime, SecondsFormat, Utc};

use crate::filter::{Filter, FilterPredicate};

/// Query parameters for the remote export endpoints.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportQuery {
    /// `keyword`.
    pub keyword: Option<String>,
    /// Repeated `tag`.
    pub tags: Vec<String>,
    /// Repeated `source`.
    pub sources: Vec<String>,
    /// `status`.
    pub status: Option<String>,
    /// `created_after`.
    pub created_after: Option<DateTime<Utc>>,
    /// `created_before`.
    pub created_before: Option<DateTime<Utc>>,
    /// `updated_after`.
    pub updated_after: Option<DateTime<Utc>>,
    /// `updated_before`.
    pub updated_before: Option<DateTime<Utc>>,
    /// `page`.
    pub page: Option<u32>,
    /// `page_size`.
    pub page_size: Option<u32>,
}

fn non_blank(s: Option<&String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl ExportQuery {
    /// Builds the query from a predicate's remote-forwardable criteria.
    ///
    /// `limit` becomes `page=1&page_size=limit` unless explicit pagination
    /// is present.
    #[must_use]
    pub fn from_predicate(p: &FilterPredicate) -> Self {
        let (page, page_size) = match (p.page, p.page_size, p.limit) {
            (None, None, Some(limit)) => (Some(1), Some(limit)),
            (page, page_size, _) => (page, page_size),
        };
        Self {
            keyword: non_blank(p.keyword.as_ref()),
            tags: p.tags.clone(),
            sources: p.sources.clone(),
            status: non_blank(p.status.as_ref()),
            created_after: p.created_after,
            created_before: p.created_before,
            updated_after: p.updated_after,
            updated_before: p.updated_before,
            page,
            page_size,
        }
    }

    /// Builds the query from the remote criteria of every predicate.
    #[must_use]
    pub fn from_filter(filter: &Filter) -> Self {
        Self::from_predicate(&filter.remote_criteria())
    }

    /// True when the caller asked for a specific page.
    #[must_use]
    pub const fn is_paginated(&self) -> bool {
        self.page.is_some() || self.page_size.is_some()
    }

    /// Sets the page.
    #[must_use]
    pub const fn with_page(mut self, page: u32, page_size: u32) -> Self {
        self.page = Some(page);
        self.page_size = Some(page_size);
        self
    }

    /// Query pairs in a stable order; list criteria repeat their key.
    #[must_use]
    pub fn to_params(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let mut push = |k: &str, v: String| out.push((k.to_string(), v));

        if let Some(k) = &self.keyword {
            push("keyword", k.clone());
        }
        for t in &self.tags {
            push("tag", t.clone());
        }
        for s in &self.sources {
            push("source", s.clone());
        }
        if let Some(s) = &self.status {
            push("status", s.clone());
        }
        for (key, t) in [
            ("created_after", self.created_after),
            ("created_before", self.created_before),
            ("updated_after", self.updated_after),
            ("updated_before", self.updated_before),
        ] {
            if let Some(t) = t {
                push(key, t.to_rfc3339_opts(SecondsFormat::Secs, true));
            }
        }
        if let Some(p) = self.page {
            push("page", p.to_string());
        }
        if let Some(s) = self.page_size {
            push("page_size", s.to_string());
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn param<'a>(params: &'a [(String, String)], key: &str) -> Vec<&'a str> {
        params
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    #[test]
    fn limit_maps_to_first_page() {
        let q = ExportQuery::from_predicate(&FilterPredicate::new().with_limit(25));
        let params = q.to_params();
        assert_eq!(param(&params, "page"), vec!["1"]);
        assert_eq!(param(&params, "page_size"), vec!["25"]);
        assert!(q.is_paginated());
    }

    #[test]
    fn explicit_pagination_wins_over_limit() {
        let q =
            ExportQuery::from_predicate(&FilterPredicate::new().with_page(3, 50).with_limit(10));
        assert_eq!(q.page, Some(3));
        assert_eq!(q.page_size, Some(50));
    }

    #[test]
    fn list_criteria_repeat_and_times_are_rfc3339() {
        let after = Utc.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        let q = ExportQuery::from_predicate(
            &FilterPredicate::new()
                .with_keyword(" nginx ")
                .with_tags(["web", "proxy"])
                .with_sources(["community"])
                .with_status("published")
                .with_created_between(Some(after), None),
        );
        let params = q.to_params();
        assert_eq!(param(&params, "keyword"), vec!["nginx"]);
        assert_eq!(param(&params, "tag"), vec!["web", "proxy"]);
        assert_eq!(param(&params, "source"), vec!["community"]);
        assert_eq!(param(&params, "status"), vec!["published"]);
        assert_eq!(param(&params, "created_after"), vec!["2024-01-02T03:04:05Z"]);
        assert!(param(&params, "page").is_empty());
        assert!(!q.is_paginated());
    }

    #[test]
    fn later_predicates_reach_the_query() {
        let filter = Filter::new(FilterPredicate::new().with_tags(["cms"]))
            .and(FilterPredicate::new().with_status("published"))
            .and(FilterPredicate::new().with_limit(20));
        let params = ExportQuery::from_filter(&filter).to_params();
        assert_eq!(param(&params, "tag"), vec!["cms"]);
        assert_eq!(param(&params, "status"), vec!["published"]);
        assert_eq!(param(&params, "page_size"), vec!["20"]);
    }

    #[test]
    fn empty_filter_is_empty_query() {
        assert!(ExportQuery::from_filter(&Filter::all()).to_params().is_empty());
    }
}
