//! Fingerprint and probe-definition records.
//!
//! These are the rows a data source hands back. Fingerprints describe how to
//! recognize a product from response bytes; probe definitions describe a
//! vulnerability check and name the fingerprints (by product name) that make
//! the check relevant.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vulnerability classification attached to a record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Severity score (CVSS-like, 0.0-10.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    /// Exploit-likelihood percentile (EPSS-like, 0.0-1.0).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub percentile: Option<f64>,
    /// CVE identifiers.
    #[serde(default)]
    pub cve_ids: Vec<String>,
    /// CWE identifiers.
    #[serde(default)]
    pub cwe_ids: Vec<String>,
}

impl Classification {
    /// Classification with only a score.
    #[must_use]
    pub fn scored(score: f64) -> Self {
        Self {
            score: Some(score),
            ..Self::default()
        }
    }

    /// Sets the percentile.
    #[must_use]
    pub fn with_percentile(mut self, percentile: f64) -> Self {
        self.percentile = Some(percentile);
        self
    }

    /// Adds a CVE identifier.
    #[must_use]
    pub fn with_cve(mut self, cve: impl Into<String>) -> Self {
        self.cve_ids.push(cve.into());
        self
    }

    /// Adds a CWE identifier.
    #[must_use]
    pub fn with_cwe(mut self, cwe: impl Into<String>) -> Self {
        self.cwe_ids.push(cwe.into());
        self
    }
}

/// Probe severity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational.
    #[default]
    Info,
    /// Low.
    Low,
    /// Medium.
    Medium,
    /// High.
    High,
    /// Critical.
    Critical,
}

impl Severity {
    /// Lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP request issued by a probe definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeRequest {
    /// HTTP method.
    #[serde(default = "default_method")]
    pub method: String,
    /// Path appended to the target base URL.
    pub path: String,
}

fn default_method() -> String {
    "GET".to_string()
}

impl Default for ProbeRequest {
    fn default() -> Self {
        Self {
            method: default_method(),
            path: "/".to_string(),
        }
    }
}

/// A product fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Stable identifier.
    pub id: String,
    /// Product name; probe definitions reference fingerprints by this name.
    pub name: String,
    /// Vendor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vendor: Option<String>,
    /// Product.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product: Option<String>,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Origin of the fingerprint (feed or repository name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Literal keywords; all must occur in the response.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Regex patterns; any may match the response.
    #[serde(default)]
    pub patterns: Vec<String>,
    /// Optional vulnerability classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// Publication status (remote-side only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Fingerprint {
    /// Creates a fingerprint whose id equals its name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            vendor: None,
            product: None,
            tags: Vec::new(),
            source: None,
            author: None,
            keywords: Vec::new(),
            patterns: Vec::new(),
            classification: None,
            status: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Sets the id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Adds tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Adds match keywords.
    #[must_use]
    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords.extend(keywords.into_iter().map(Into::into));
        self
    }

    /// Adds a regex match pattern.
    #[must_use]
    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.patterns.push(pattern.into());
        self
    }

    /// Sets the vendor.
    #[must_use]
    pub fn with_vendor(mut self, vendor: impl Into<String>) -> Self {
        self.vendor = Some(vendor.into());
        self
    }

    /// Sets the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Sets the classification.
    #[must_use]
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }
}

/// A vulnerability probe definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeDefinition {
    /// Stable identifier.
    pub id: String,
    /// Human-readable name.
    pub name: String,
    /// Severity.
    #[serde(default)]
    pub severity: Severity,
    /// Tags.
    #[serde(default)]
    pub tags: Vec<String>,
    /// Origin of the definition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Author.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// Fingerprint names this definition applies to.
    #[serde(default)]
    pub fingerprints: Vec<String>,
    /// Optional vulnerability classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub classification: Option<Classification>,
    /// Request to issue.
    #[serde(default)]
    pub request: ProbeRequest,
    /// Words that must all occur in the response for a hit.
    #[serde(default)]
    pub matchers: Vec<String>,
    /// Publication status (remote-side only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Creation timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update timestamp.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProbeDefinition {
    /// Creates a definition whose name equals its id.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            severity: Severity::Info,
            tags: Vec::new(),
            source: None,
            author: None,
            fingerprints: Vec::new(),
            classification: None,
            request: ProbeRequest::default(),
            matchers: Vec::new(),
            status: None,
            created_at: None,
            updated_at: None,
        }
    }

    /// Adds fingerprint references.
    #[must_use]
    pub fn with_fingerprints<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fingerprints.extend(names.into_iter().map(Into::into));
        self
    }

    /// Adds tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Sets the severity.
    #[must_use]
    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    /// Sets the request path.
    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.request.path = path.into();
        self
    }

    /// Adds response matchers.
    #[must_use]
    pub fn with_matchers<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.matchers.extend(words.into_iter().map(Into::into));
        self
    }

    /// Sets the source.
    #[must_use]
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Sets the author.
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    /// Sets the classification.
    #[must_use]
    pub fn with_classification(mut self, classification: Classification) -> Self {
        self.classification = Some(classification);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_definition_defaults_from_minimal_json() {
        let def: ProbeDefinition =
            serde_json::from_str(r#"{"id":"CVE-2021-41773","name":"path traversal"}"#).unwrap();
        assert_eq!(def.severity, Severity::Info);
        assert_eq!(def.request.method, "GET");
        assert!(def.fingerprints.is_empty());
    }

    #[test]
    fn test_fingerprint_serialization() {
        let fp = Fingerprint::new("nginx")
            .with_tags(["web", "proxy"])
            .with_keywords(["Server: nginx"])
            .with_classification(Classification::scored(5.0).with_cve("CVE-2021-23017"));

        let json = serde_json::to_string(&fp).unwrap();
        let back: Fingerprint = serde_json::from_str(&json).unwrap();
        assert_eq!(fp, back);
    }

    #[test]
    fn test_severity_ordering_and_display() {
        assert!(Severity::Critical > Severity::High);
        assert_eq!(Severity::Medium.to_string(), "medium");
        let s: Severity = serde_json::from_str("\"critical\"").unwrap();
        assert_eq!(s, Severity::Critical);
    }
}
