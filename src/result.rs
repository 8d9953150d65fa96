//! Per-item result envelope.
//!
//! Every accepted work item yields exactly one `ItemResult` unless the run
//! was cancelled before the item was scheduled. `success()`, `error()` and
//! `data()` are the base contract; typed accessors sit on top.

use serde::{Deserialize, Serialize};

use crate::error::ExecutionError;
use crate::record::Severity;

/// Outcome of probing one port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortObservation {
    /// Host as enumerated.
    pub host: String,
    /// Port.
    pub port: u16,
    /// Whether the port accepted a connection.
    pub open: bool,
    /// Banner bytes read after connecting (lossy UTF-8).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub banner: Option<String>,
    /// Connect latency in milliseconds.
    pub latency_ms: u64,
}

/// One fingerprint that matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FingerprintHit {
    /// Fingerprint id.
    pub id: String,
    /// Fingerprint name.
    pub name: String,
    /// Keyword or pattern that produced the hit.
    pub evidence: String,
}

/// Outcome of running one probe definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFinding {
    /// Target.
    pub target: String,
    /// Definition id.
    pub probe_id: String,
    /// Definition severity.
    pub severity: Severity,
    /// Whether the target is affected.
    pub vulnerable: bool,
    /// Matched words or runner notes.
    #[serde(default)]
    pub evidence: Vec<String>,
}

/// Outcome of fetching one URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpObservation {
    /// Requested URL.
    pub url: String,
    /// Status code.
    pub status: u16,
    /// Whether the status is one the caller asked for.
    pub hit: bool,
    /// Content length of the (possibly truncated) body.
    pub content_length: usize,
    /// HTML title, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// `Server` response header.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    /// Body (truncated to the configured limit).
    #[serde(default, skip)]
    pub body: String,
}

/// Payload of an item result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ResultData {
    /// No payload (failed items).
    #[default]
    Empty,
    /// Port scan observation.
    Port(PortObservation),
    /// Fingerprint hits for one match task.
    Match(Vec<FingerprintHit>),
    /// Probe finding.
    Probe(ProbeFinding),
    /// HTTP observation.
    Http(HttpObservation),
}

/// Success/error/data envelope for one unit of completed work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawItemResult")]
pub struct ItemResult {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<ExecutionError>,
    data: ResultData,
}

/// Wire form of [`ItemResult`] before the success/error pairing is checked.
#[derive(Deserialize)]
struct RawItemResult {
    success: bool,
    #[serde(default)]
    error: Option<ExecutionError>,
    #[serde(default)]
    data: ResultData,
}

impl TryFrom<RawItemResult> for ItemResult {
    type Error = String;

    fn try_from(raw: RawItemResult) -> Result<Self, Self::Error> {
        match (raw.success, raw.error) {
            (true, None) => Ok(Self::ok(raw.data)),
            (false, Some(error)) => Ok(Self {
                success: false,
                error: Some(error),
                data: raw.data,
            }),
            (false, None) => Err("failed result carries no error".to_string()),
            (true, Some(error)) => Err(format!("successful result carries an error: {error}")),
        }
    }
}

impl ItemResult {
    /// A successful result.
    #[must_use]
    pub const fn ok(data: ResultData) -> Self {
        Self {
            success: true,
            error: None,
            data,
        }
    }

    /// A failed result; failure always carries an error.
    #[must_use]
    pub const fn failed(error: ExecutionError) -> Self {
        Self {
            success: false,
            error: Some(error),
            data: ResultData::Empty,
        }
    }

    /// Builds a result from a collaborator outcome.
    #[must_use]
    pub fn from_outcome(outcome: Result<ResultData, ExecutionError>) -> Self {
        match outcome {
            Ok(data) => Self::ok(data),
            Err(err) => Self::failed(err),
        }
    }

    /// Whether the item succeeded.
    #[must_use]
    pub const fn success(&self) -> bool {
        self.success
    }

    /// The item error; always `Some` when `success()` is false.
    #[must_use]
    pub const fn error(&self) -> Option<&ExecutionError> {
        self.error.as_ref()
    }

    /// The payload.
    #[must_use]
    pub const fn data(&self) -> &ResultData {
        &self.data
    }

    /// Consumes the result, returning its payload.
    #[must_use]
    pub fn into_data(self) -> ResultData {
        self.data
    }

    /// Port observation, if this is a scan result.
    #[must_use]
    pub const fn as_port(&self) -> Option<&PortObservation> {
        match &self.data {
            ResultData::Port(p) => Some(p),
            _ => None,
        }
    }

    /// Fingerprint hits, if this is a match result.
    #[must_use]
    pub fn as_match(&self) -> Option<&[FingerprintHit]> {
        match &self.data {
            ResultData::Match(hits) => Some(hits.as_slice()),
            _ => None,
        }
    }

    /// Probe finding, if this is a probe result.
    #[must_use]
    pub const fn as_probe(&self) -> Option<&ProbeFinding> {
        match &self.data {
            ResultData::Probe(p) => Some(p),
            _ => None,
        }
    }

    /// HTTP observation, if this is a check or brute result.
    #[must_use]
    pub const fn as_http(&self) -> Option<&HttpObservation> {
        match &self.data {
            ResultData::Http(h) => Some(h),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_always_carries_error() {
        let r = ItemResult::failed(ExecutionError::Timeout { duration_ms: 10 });
        assert!(!r.success());
        assert!(r.error().is_some());
        assert_eq!(r.data(), &ResultData::Empty);
    }

    #[test]
    fn from_outcome_maps_both_arms() {
        let ok = ItemResult::from_outcome(Ok(ResultData::Match(Vec::new())));
        assert!(ok.success());
        assert!(ok.error().is_none());
        assert_eq!(ok.as_match().map(<[FingerprintHit]>::len), Some(0));

        let err = ItemResult::from_outcome(Err(ExecutionError::ProbeFailed {
            target: "10.0.0.1:80".to_string(),
            message: "refused".to_string(),
        }));
        assert!(!err.success());
        assert!(err.as_port().is_none());
    }

    #[test]
    fn typed_accessors_match_payload() {
        let r = ItemResult::ok(ResultData::Port(PortObservation {
            host: "10.0.0.1".to_string(),
            port: 22,
            open: true,
            banner: None,
            latency_ms: 3,
        }));
        assert_eq!(r.as_port().unwrap().port, 22);
        assert!(r.as_http().is_none());
        assert!(r.as_probe().is_none());
    }

    #[test]
    fn error_keeps_its_variant_through_json() {
        let r = ItemResult::failed(ExecutionError::Timeout { duration_ms: 7 });
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["kind"], "timeout");

        let back: ItemResult = serde_json::from_value(json).unwrap();
        assert_eq!(back, r);
        assert_eq!(
            back.error(),
            Some(&ExecutionError::Timeout { duration_ms: 7 })
        );
    }

    #[test]
    fn failure_without_error_is_rejected() {
        let missing = serde_json::from_str::<ItemResult>(
            r#"{"success":false,"data":{"type":"empty"}}"#,
        );
        assert!(missing.is_err());

        let contradictory = serde_json::from_value::<ItemResult>(serde_json::json!({
            "success": true,
            "error": {"kind": "timeout", "duration_ms": 1},
            "data": {"type": "empty"}
        }));
        assert!(contradictory.is_err());

        let ok: ItemResult = serde_json::from_str(r#"{"success":true,"data":{"type":"empty"}}"#)
            .unwrap();
        assert!(ok.success());
    }
}
