//! Task definitions and validation.
//!
//! A `Task` describes one batch of work. Each variant belongs to one engine
//! capability and validates itself structurally (no network or disk access)
//! before any work item derived from it is scheduled.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::record::ProbeDefinition;
use crate::targets::{self, TargetSet};

/// Conservative upper bound for raw match payloads.
pub const MAX_RAW_BYTES: usize = 16 * 1024 * 1024;

/// Conservative upper bound for free-form text fields.
pub const MAX_TEXT_LEN: usize = 8 * 1024;

fn validate_non_empty(field: &'static str, value: &str) -> Result<(), ValidationError> {
    let v = value.trim();
    if v.is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    if v.len() > MAX_TEXT_LEN {
        return Err(ValidationError::FieldTooLong {
            field: field.to_string(),
            max_length: MAX_TEXT_LEN,
        });
    }
    Ok(())
}

fn validate_list(field: &'static str, items: &[String]) -> Result<(), ValidationError> {
    if items.is_empty() {
        return Err(ValidationError::MissingField {
            field: field.to_string(),
        });
    }
    for item in items {
        validate_non_empty(field, item)?;
    }
    targets::check_workload(items.len() as u128)
}

/// Discriminant of [`Task`], used to declare what an engine accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// [`Task::Scan`].
    Scan,
    /// [`Task::Match`].
    Match,
    /// [`Task::ProbeExecute`].
    ProbeExecute,
    /// [`Task::Check`].
    Check,
    /// [`Task::Brute`].
    Brute,
}

impl TaskKind {
    /// Short name, used in logs and errors.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scan => "scan",
            Self::Match => "match",
            Self::ProbeExecute => "probe_execute",
            Self::Check => "check",
            Self::Brute => "brute",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// All supported tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Task {
    /// Port scan: targets x ports.
    Scan(ScanTask),
    /// Fingerprint match over raw response bytes.
    Match(MatchTask),
    /// Vulnerability probes: target x probe definitions.
    ProbeExecute(ProbeExecuteTask),
    /// HTTP batch check over a URL list.
    Check(CheckTask),
    /// HTTP path brute force: base URL x wordlist.
    Brute(BruteTask),
}

impl Task {
    /// Validates the task payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Scan(t) => t.validate(),
            Self::Match(t) => t.validate(),
            Self::ProbeExecute(t) => t.validate(),
            Self::Check(t) => t.validate(),
            Self::Brute(t) => t.validate(),
        }
    }

    /// The variant's kind.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        match self {
            Self::Scan(_) => TaskKind::Scan,
            Self::Match(_) => TaskKind::Match,
            Self::ProbeExecute(_) => TaskKind::ProbeExecute,
            Self::Check(_) => TaskKind::Check,
            Self::Brute(_) => TaskKind::Brute,
        }
    }
}

/// Port scan payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTask {
    /// Address, CIDR block, dash range or host name (comma-separated).
    pub ip: String,
    /// Port expression such as `22,80,8000-8010`.
    pub ports: String,
}

impl ScanTask {
    /// Creates a scan task.
    #[must_use]
    pub fn new(ip: impl Into<String>, ports: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            ports: ports.into(),
        }
    }

    /// Validates this payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.workload().map(|_| ())
    }

    /// Parses both sides of the workload and checks its size.
    pub fn workload(&self) -> Result<(TargetSet, Vec<u16>), ValidationError> {
        if self.ip.trim().is_empty() {
            return Err(ValidationError::MissingField {
                field: "IP".to_string(),
            });
        }
        let hosts = TargetSet::parse(&self.ip)?;
        let ports = targets::parse_ports(&self.ports)?;
        targets::check_workload(hosts.len().saturating_mul(ports.len() as u128))?;
        Ok((hosts, ports))
    }
}

/// Fingerprint match payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchTask {
    /// Raw response bytes (headers and body).
    pub raw: Vec<u8>,
}

impl MatchTask {
    /// Creates a match task.
    #[must_use]
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Self { raw: raw.into() }
    }

    /// Validates this payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.raw.is_empty() {
            return Err(ValidationError::MissingField {
                field: "raw".to_string(),
            });
        }
        if self.raw.len() > MAX_RAW_BYTES {
            return Err(ValidationError::FieldTooLong {
                field: "raw".to_string(),
                max_length: MAX_RAW_BYTES,
            });
        }
        Ok(())
    }
}

/// Which probe definitions a probe run covers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "by", content = "values", rename_all = "snake_case")]
pub enum ProbeSelection {
    /// Explicit definitions.
    Definitions(Vec<ProbeDefinition>),
    /// Definition ids resolved against the loaded definition set.
    Ids(Vec<String>),
    /// Fingerprint names; every definition associated with any of them runs.
    Fingerprints(Vec<String>),
}

impl ProbeSelection {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Definitions(defs) => {
                if defs.is_empty() {
                    return Err(ValidationError::MissingField {
                        field: "probes".to_string(),
                    });
                }
                for def in defs {
                    validate_non_empty("probes.id", &def.id)?;
                }
                targets::check_workload(defs.len() as u128)
            }
            Self::Ids(ids) => validate_list("probes", ids),
            Self::Fingerprints(names) => validate_list("fingerprints", names),
        }
    }
}

/// Vulnerability probe payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeExecuteTask {
    /// Base URL or host the probes run against.
    pub target: String,
    /// Probe definitions to run.
    pub probes: ProbeSelection,
}

impl ProbeExecuteTask {
    /// Creates a probe task.
    #[must_use]
    pub fn new(target: impl Into<String>, probes: ProbeSelection) -> Self {
        Self {
            target: target.into(),
            probes,
        }
    }

    /// Validates this payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_non_empty("target", &self.target)?;
        self.probes.validate()
    }
}

/// HTTP batch check payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTask {
    /// URLs to fetch.
    pub urls: Vec<String>,
}

impl CheckTask {
    /// Creates a check task.
    #[must_use]
    pub fn new<I, S>(urls: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            urls: urls.into_iter().map(Into::into).collect(),
        }
    }

    /// Validates this payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_list("urls", &self.urls)
    }
}

/// HTTP brute-force payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BruteTask {
    /// Base URL the words are appended to.
    pub base_url: String,
    /// Path words.
    pub wordlist: Vec<String>,
}

impl BruteTask {
    /// Creates a brute task.
    #[must_use]
    pub fn new<I, S>(base_url: impl Into<String>, wordlist: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            base_url: base_url.into(),
            wordlist: wordlist.into_iter().map(Into::into).collect(),
        }
    }

    /// Validates this payload.
    pub fn validate(&self) -> Result<(), ValidationError> {
        validate_non_empty("base_url", &self.base_url)?;
        validate_list("wordlist", &self.wordlist)
    }

    /// URLs in wordlist order.
    #[must_use]
    pub fn urls(&self) -> Vec<String> {
        let base = self.base_url.trim().trim_end_matches('/');
        self.wordlist
            .iter()
            .map(|w| format!("{base}/{}", w.trim().trim_start_matches('/')))
            .collect()
    }
}

impl From<ScanTask> for Task {
    fn from(t: ScanTask) -> Self {
        Self::Scan(t)
    }
}

impl From<MatchTask> for Task {
    fn from(t: MatchTask) -> Self {
        Self::Match(t)
    }
}

impl From<ProbeExecuteTask> for Task {
    fn from(t: ProbeExecuteTask) -> Self {
        Self::ProbeExecute(t)
    }
}

impl From<CheckTask> for Task {
    fn from(t: CheckTask) -> Self {
        Self::Check(t)
    }
}

impl From<BruteTask> for Task {
    fn from(t: BruteTask) -> Self {
        Self::Brute(t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_task_requires_ip() {
        let err = ScanTask::new("", "80").validate().unwrap_err();
        assert!(format!("{err}").contains("IP"));

        let err = ScanTask::new(" , ", "80").validate().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { ref field } if field == "IP"));
    }

    #[test]
    fn scan_task_requires_ports() {
        let err = ScanTask::new("10.0.0.1", " ").validate().unwrap_err();
        assert!(matches!(err, ValidationError::MissingField { ref field } if field == "Ports"));
        assert!(ScanTask::new("10.0.0.1", "80,443").validate().is_ok());
    }

    #[test]
    fn scan_task_rejects_oversized_workload() {
        let err = ScanTask::new("10.0.0.0/8", "1-1000").validate().unwrap_err();
        assert!(matches!(err, ValidationError::WorkloadTooLarge { .. }));
    }

    #[test]
    fn match_task_requires_bytes() {
        assert!(MatchTask::new(Vec::new()).validate().is_err());
        assert!(MatchTask::new(b"HTTP/1.1 200 OK".to_vec()).validate().is_ok());
    }

    #[test]
    fn probe_task_requires_target_and_selection() {
        let empty_target = ProbeExecuteTask::new(
            "",
            ProbeSelection::Definitions(vec![ProbeDefinition::new("t1")]),
        );
        assert!(empty_target.validate().is_err());

        let empty_set =
            ProbeExecuteTask::new("http://host", ProbeSelection::Definitions(Vec::new()));
        assert!(empty_set.validate().is_err());

        let blank_fp = ProbeExecuteTask::new(
            "http://host",
            ProbeSelection::Fingerprints(vec![" ".to_string()]),
        );
        assert!(blank_fp.validate().is_err());

        let ok = ProbeExecuteTask::new(
            "http://host",
            ProbeSelection::Fingerprints(vec!["nginx".to_string()]),
        );
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn check_task_rejects_empty_and_blank_urls() {
        assert!(CheckTask::new(Vec::<String>::new()).validate().is_err());
        assert!(CheckTask::new(["http://a", ""]).validate().is_err());
        assert!(CheckTask::new(["http://a", "http://b"]).validate().is_ok());
    }

    #[test]
    fn brute_task_validates_and_joins() {
        assert!(BruteTask::new("", ["admin"]).validate().is_err());
        assert!(BruteTask::new("http://h", Vec::<String>::new()).validate().is_err());

        let task = BruteTask::new("http://h/", ["admin", "/login"]);
        assert!(task.validate().is_ok());
        assert_eq!(task.urls(), vec!["http://h/admin", "http://h/login"]);
    }

    #[test]
    fn task_dispatch_and_kind() {
        let task: Task = CheckTask::new(["http://a"]).into();
        assert_eq!(task.kind(), TaskKind::Check);
        assert_eq!(task.kind().to_string(), "check");
        assert_eq!(
            serde_json::to_value(TaskKind::ProbeExecute).unwrap(),
            "probe_execute"
        );
        assert!(task.validate().is_ok());

        let bad: Task = ScanTask::new("", "80").into();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn task_serde_tagging() {
        let task: Task = ScanTask::new("10.0.0.1", "22").into();
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["kind"], "scan");
        let back: Task = serde_json::from_value(json).unwrap();
        assert_eq!(back, task);
    }
}
