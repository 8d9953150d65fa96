use crate::index::AssociationIndex;
use crate::record::{Classification, Fingerprint, ProbeDefinition, Severity};

use super::clause::FieldValue;

/// A record the predicate filter can evaluate.
pub trait Filterable {
    /// Record identifier.
    fn record_id(&self) -> &str;

    /// Text fields searched by the keyword constraint.
    fn keyword_text(&self) -> Vec<&str>;

    /// Tags.
    fn tags(&self) -> &[String];

    /// Origin feed or repository.
    fn source(&self) -> Option<&str>;

    /// Author.
    fn author(&self) -> Option<&str>;

    /// Vendor; `None` for records without one.
    fn vendor(&self) -> Option<&str>;

    /// Severity; `None` for records without one.
    fn severity(&self) -> Option<Severity>;

    /// Vulnerability classification.
    fn classification(&self) -> Option<&Classification>;

    /// Whether the record participates in an association, or `None` when
    /// that cannot be decided.
    fn association(&self, index: Option<&AssociationIndex>) -> Option<bool>;

    /// Resolves a named field for advanced clauses.
    fn field(&self, name: &str) -> Option<FieldValue<'_>>;
}

fn text(value: Option<&String>) -> Option<FieldValue<'_>> {
    value.map(|s| FieldValue::Text(s.as_str()))
}

fn classification_field<'a>(c: Option<&'a Classification>, name: &str) -> Option<FieldValue<'a>> {
    let c = c?;
    match name {
        "score" => c.score.map(FieldValue::Number),
        "percentile" => c.percentile.map(FieldValue::Number),
        "cve" => Some(FieldValue::List(&c.cve_ids)),
        "cwe" => Some(FieldValue::List(&c.cwe_ids)),
        _ => None,
    }
}

impl Filterable for Fingerprint {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn keyword_text(&self) -> Vec<&str> {
        let mut out = vec![self.id.as_str(), self.name.as_str()];
        out.extend(self.vendor.as_deref());
        out.extend(self.product.as_deref());
        out.extend(self.keywords.iter().map(String::as_str));
        out
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    fn vendor(&self) -> Option<&str> {
        self.vendor.as_deref()
    }

    fn severity(&self) -> Option<Severity> {
        None
    }

    fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    fn association(&self, index: Option<&AssociationIndex>) -> Option<bool> {
        index.map(|idx| idx.has_associated_child(&self.name))
    }

    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "id" => Some(FieldValue::Text(&self.id)),
            "name" => Some(FieldValue::Text(&self.name)),
            "vendor" => text(self.vendor.as_ref()),
            "product" => text(self.product.as_ref()),
            "tags" => Some(FieldValue::List(&self.tags)),
            "source" => text(self.source.as_ref()),
            "author" => text(self.author.as_ref()),
            "keywords" => Some(FieldValue::List(&self.keywords)),
            "patterns" => Some(FieldValue::List(&self.patterns)),
            "status" => text(self.status.as_ref()),
            "created_at" => self.created_at.map(FieldValue::Time),
            "updated_at" => self.updated_at.map(FieldValue::Time),
            other => classification_field(self.classification.as_ref(), other),
        }
    }
}

impl Filterable for ProbeDefinition {
    fn record_id(&self) -> &str {
        &self.id
    }

    fn keyword_text(&self) -> Vec<&str> {
        let mut out = vec![self.id.as_str(), self.name.as_str()];
        out.extend(self.fingerprints.iter().map(String::as_str));
        if let Some(c) = &self.classification {
            out.extend(c.cve_ids.iter().map(String::as_str));
        }
        out
    }

    fn tags(&self) -> &[String] {
        &self.tags
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    fn author(&self) -> Option<&str> {
        self.author.as_deref()
    }

    fn vendor(&self) -> Option<&str> {
        None
    }

    fn severity(&self) -> Option<Severity> {
        Some(self.severity)
    }

    fn classification(&self) -> Option<&Classification> {
        self.classification.as_ref()
    }

    fn association(&self, _index: Option<&AssociationIndex>) -> Option<bool> {
        Some(self.fingerprints.iter().any(|f| !f.trim().is_empty()))
    }

    fn field(&self, name: &str) -> Option<FieldValue<'_>> {
        match name {
            "id" => Some(FieldValue::Text(&self.id)),
            "name" => Some(FieldValue::Text(&self.name)),
            "severity" => Some(FieldValue::Text(self.severity.as_str())),
            "tags" => Some(FieldValue::List(&self.tags)),
            "source" => text(self.source.as_ref()),
            "author" => text(self.author.as_ref()),
            "fingerprints" => Some(FieldValue::List(&self.fingerprints)),
            "matchers" => Some(FieldValue::List(&self.matchers)),
            "method" => Some(FieldValue::Text(&self.request.method)),
            "path" => Some(FieldValue::Text(&self.request.path)),
            "status" => text(self.status.as_ref()),
            "created_at" => self.created_at.map(FieldValue::Time),
            "updated_at" => self.updated_at.map(FieldValue::Time),
            other => classification_field(self.classification.as_ref(), other),
        }
    }
}
