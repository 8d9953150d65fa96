//! Advanced `{field, operator, value}` clauses.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ValidationError;
use crate::pattern::cached_regex;

/// Field names a clause may reference.
pub const KNOWN_FIELDS: &[&str] = &[
    "id",
    "name",
    "vendor",
    "product",
    "tags",
    "source",
    "author",
    "keywords",
    "patterns",
    "severity",
    "fingerprints",
    "matchers",
    "method",
    "path",
    "status",
    "score",
    "percentile",
    "cve",
    "cwe",
    "created_at",
    "updated_at",
];

/// A record field value as seen by a clause.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue<'a> {
    /// Scalar text.
    Text(&'a str),
    /// List of strings.
    List(&'a [String]),
    /// Number.
    Number(f64),
    /// Timestamp.
    Time(DateTime<Utc>),
}

impl FieldValue<'_> {
    fn is_present(&self) -> bool {
        match self {
            Self::Text(s) => !s.trim().is_empty(),
            Self::List(items) => !items.is_empty(),
            Self::Number(_) | Self::Time(_) => true,
        }
    }
}

/// Clause operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    /// Equal (case-insensitive for text).
    Eq,
    /// Not equal.
    Ne,
    /// Substring.
    Contains,
    /// No substring.
    NotContains,
    /// Prefix.
    StartsWith,
    /// Suffix.
    EndsWith,
    /// Regex match.
    Regex,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal.
    Lte,
    /// Member of an array operand.
    In,
    /// Field is present and non-empty.
    Exists,
}

impl Operator {
    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Contains => "contains",
            Self::NotContains => "not_contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::Regex => "regex",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::In => "in",
            Self::Exists => "exists",
        }
    }

    const fn is_ordering(self) -> bool {
        matches!(self, Self::Gt | Self::Gte | Self::Lt | Self::Lte)
    }

    fn accepts(self, ord: Ordering) -> bool {
        match self {
            Self::Gt => ord == Ordering::Greater,
            Self::Gte => ord != Ordering::Less,
            Self::Lt => ord == Ordering::Less,
            Self::Lte => ord != Ordering::Greater,
            Self::Eq => ord == Ordering::Equal,
            Self::Ne => ord != Ordering::Equal,
            _ => false,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One advanced clause. A missing field fails every operator except
/// `exists` with a `false` value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdvancedClause {
    /// Field name, one of [`KNOWN_FIELDS`].
    pub field: String,
    /// Operator.
    pub operator: Operator,
    /// Operand. `in` takes an array, `exists` an optional bool.
    #[serde(default)]
    pub value: Value,
}

fn invalid(reason: String) -> ValidationError {
    ValidationError::InvalidFilter { reason }
}

fn value_text(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn value_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn value_time(v: &Value) -> Option<DateTime<Utc>> {
    v.as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s.trim()).ok())
        .map(|t| t.with_timezone(&Utc))
}

impl AdvancedClause {
    /// Creates a clause.
    #[must_use]
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// Checks the field name and the operand shape, compiling regexes.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if !KNOWN_FIELDS.contains(&self.field.as_str()) {
            return Err(invalid(format!("unknown field '{}'", self.field)));
        }
        let op = self.operator;
        match op {
            Operator::Exists => {
                if !(self.value.is_null() || self.value.is_boolean()) {
                    return Err(invalid(format!("'{op}' on '{}' takes a bool", self.field)));
                }
            }
            Operator::In => {
                let Some(items) = self.value.as_array() else {
                    return Err(invalid(format!("'{op}' on '{}' takes an array", self.field)));
                };
                if items.iter().any(|v| value_text(v).is_none()) {
                    return Err(invalid(format!("'{op}' on '{}' takes scalar items", self.field)));
                }
            }
            Operator::Regex => {
                let Some(pattern) = self.value.as_str() else {
                    return Err(invalid(format!("'{op}' on '{}' takes a string", self.field)));
                };
                cached_regex(pattern)?;
            }
            _ => {
                if value_text(&self.value).is_none() {
                    return Err(invalid(format!("'{op}' on '{}' takes a scalar", self.field)));
                }
            }
        }
        Ok(())
    }

    /// Evaluates the clause against a resolved field value.
    #[must_use]
    pub fn evaluate(&self, field: Option<FieldValue<'_>>) -> bool {
        if self.operator == Operator::Exists {
            let want = self.value.as_bool().unwrap_or(true);
            return field.is_some_and(|f| f.is_present()) == want;
        }
        match field {
            None => false,
            Some(FieldValue::Text(s)) => self.eval_text(s),
            Some(FieldValue::List(items)) => self.eval_list(items),
            Some(FieldValue::Number(n)) => self.eval_number(n),
            Some(FieldValue::Time(t)) => self.eval_time(t),
        }
    }

    fn eval_text(&self, s: &str) -> bool {
        let op = self.operator;
        if op == Operator::In {
            return self
                .in_items(|v| value_text(v).is_some_and(|t| t.eq_ignore_ascii_case(s.trim())));
        }
        if op == Operator::Regex {
            return self
                .value
                .as_str()
                .and_then(|p| cached_regex(p).ok())
                .is_some_and(|re| re.is_match(s));
        }
        let Some(operand) = value_text(&self.value) else {
            return false;
        };
        if op.is_ordering() {
            if let (Ok(a), Some(b)) = (s.trim().parse::<f64>(), value_number(&self.value)) {
                return a.partial_cmp(&b).is_some_and(|ord| op.accepts(ord));
            }
        }
        let hay = s.trim().to_lowercase();
        let needle = operand.trim().to_lowercase();
        match op {
            Operator::Eq => hay == needle,
            Operator::Ne => hay != needle,
            Operator::Contains => hay.contains(&needle),
            Operator::NotContains => !hay.contains(&needle),
            Operator::StartsWith => hay.starts_with(&needle),
            Operator::EndsWith => hay.ends_with(&needle),
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
                op.accepts(hay.cmp(&needle))
            }
            Operator::Regex | Operator::In | Operator::Exists => false,
        }
    }

    fn eval_list(&self, items: &[String]) -> bool {
        match self.operator {
            // Negative operators hold when no element matches the positive form.
            Operator::Ne => !items.iter().any(|s| self.with_operator(Operator::Eq).eval_text(s)),
            Operator::NotContains => !items
                .iter()
                .any(|s| self.with_operator(Operator::Contains).eval_text(s)),
            Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => false,
            _ => items.iter().any(|s| self.eval_text(s)),
        }
    }

    fn eval_number(&self, n: f64) -> bool {
        match self.operator {
            Operator::In => self.in_items(|v| value_number(v).is_some_and(|x| x == n)),
            Operator::Eq
            | Operator::Ne
            | Operator::Gt
            | Operator::Gte
            | Operator::Lt
            | Operator::Lte => {
                value_number(&self.value)
                    .and_then(|b| n.partial_cmp(&b))
                    .is_some_and(|ord| self.operator.accepts(ord))
            }
            Operator::Regex => self.eval_text(&n.to_string()),
            _ => false,
        }
    }

    fn eval_time(&self, t: DateTime<Utc>) -> bool {
        match self.operator {
            Operator::Eq
            | Operator::Ne
            | Operator::Gt
            | Operator::Gte
            | Operator::Lt
            | Operator::Lte => {
                value_time(&self.value).is_some_and(|b| self.operator.accepts(t.cmp(&b)))
            }
            _ => false,
        }
    }

    fn in_items(&self, pred: impl Fn(&Value) -> bool) -> bool {
        self.value
            .as_array()
            .is_some_and(|items| items.iter().any(pred))
    }

    fn with_operator(&self, operator: Operator) -> Self {
        Self {
            field: self.field.clone(),
            operator,
            value: self.value.clone(),
        }
    }
}
