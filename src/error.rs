//! Error types for scanfuse.
//!
//! All errors in scanfuse are strongly typed using thiserror.
//! Errors that invalidate a whole run (validation, configuration,
//! authentication) surface from `Engine::execute` before any worker starts.
//! Errors that only affect one work item are carried inside that item's
//! `ItemResult` instead.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::task::TaskKind;

/// Validation errors for malformed tasks, filters and config values.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field '{field}' is missing")]
    MissingField {
        field: String,
    },

    #[error("Field '{field}' exceeds maximum length of {max_length}")]
    FieldTooLong {
        field: String,
        max_length: usize,
    },

    #[error("Invalid target '{value}': {reason}")]
    InvalidTarget {
        value: String,
        reason: String,
    },

    #[error("Invalid port expression '{value}': {reason}")]
    InvalidPorts {
        value: String,
        reason: String,
    },

    #[error("Workload of {items} items exceeds the maximum of {max}")]
    WorkloadTooLarge {
        items: u128,
        max: u64,
    },

    #[error("Invalid filter: {reason}")]
    InvalidFilter {
        reason: String,
    },

    #[error("Engine '{engine}' does not accept {task} tasks")]
    UnsupportedTask {
        engine: String,
        task: TaskKind,
    },
}

/// Configuration errors. These fail engine or client construction outright.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("engine '{name}' is already registered")]
    DuplicateEngine {
        name: String,
    },

    #[error("unknown engine: {name} (available: [{}])", available.join(", "))]
    UnknownEngine {
        name: String,
        available: Vec<String>,
    },

    #[error("an API key is required when a remote URL is configured ({url})")]
    MissingApiKey {
        url: String,
    },

    #[error("invalid value for '{key}': {reason}")]
    InvalidValue {
        key: String,
        reason: String,
    },
}

/// Per-item and runtime execution errors.
///
/// Serialized with a `kind` tag so that an item error keeps its variant
/// when results are persisted or shipped.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionError {
    #[error("Probe of {target} failed: {message}")]
    ProbeFailed {
        target: String,
        message: String,
    },

    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Engine '{engine}' is closed")]
    EngineClosed {
        engine: String,
    },

    #[error("Channel disconnected: {path}")]
    Disconnected {
        path: String,
    },

    #[error("No probe definitions resolved for the selection: {reason}")]
    EmptyProbeSet {
        reason: String,
    },

    #[error("Failed to spawn worker thread: {message}")]
    Spawn {
        message: String,
    },
}

/// Transport errors talking to the remote data source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("Connection failed: {message}")]
    ConnectionFailed {
        message: String,
    },

    #[error("HTTP status {status} from {url}")]
    HttpStatus {
        status: u16,
        url: String,
    },

    #[error("Failed to deserialize response: {message}")]
    DeserializationFailed {
        message: String,
    },

    #[error("Application error (code {code}): {message}")]
    Application {
        code: i64,
        message: String,
    },
}

/// Top-level error type for scanfuse.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FuseError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Authentication failed (HTTP {status}): {message}")]
    Auth {
        status: u16,
        message: String,
    },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    #[error("Internal error: {message}")]
    Internal {
        message: String,
    },
}

impl FuseError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }

    /// Returns true if this is a configuration error.
    #[must_use]
    pub const fn is_config(&self) -> bool {
        matches!(self, Self::Config(_))
    }

    /// Returns true if this is an authentication error.
    #[must_use]
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth { .. })
    }

    /// Returns true if this is a transport error.
    #[must_use]
    pub const fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub const fn is_execution(&self) -> bool {
        matches!(self, Self::Execution(_))
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Validation(_) | Self::Config(_) | Self::Auth { .. } | Self::Internal { .. } => {
                false
            }
            Self::Execution(e) => matches!(e, ExecutionError::Timeout { .. }),
            Self::Transport(e) => match e {
                TransportError::ConnectionFailed { .. }
                | TransportError::DeserializationFailed { .. } => true,
                TransportError::HttpStatus { status, .. } => *status >= 500 || *status == 429,
                TransportError::Application { .. } => false,
            },
        }
    }
}

/// Result type alias for scanfuse operations.
pub type FuseResult<T> = Result<T, FuseError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_field_names_the_field() {
        let err = ValidationError::MissingField {
            field: "IP".to_string(),
        };
        let msg = format!("{err}");
        assert!(msg.contains("IP"));
        assert!(msg.contains("missing"));
    }

    #[test]
    fn test_unknown_engine_lists_available() {
        let err = ConfigError::UnknownEngine {
            name: "nope".to_string(),
            available: vec!["http".to_string(), "portscan".to_string()],
        };
        assert_eq!(
            format!("{err}"),
            "unknown engine: nope (available: [http, portscan])"
        );
    }

    #[test]
    fn test_execution_error_timeout() {
        let err = ExecutionError::Timeout { duration_ms: 5000 };
        let msg = format!("{err}");
        assert!(msg.contains("5000ms"));
    }

    #[test]
    fn test_fuse_error_from_validation() {
        let err: FuseError = ValidationError::MissingField {
            field: "urls".to_string(),
        }
        .into();
        assert!(err.is_validation());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_fuse_error_from_config() {
        let err: FuseError = ConfigError::MissingApiKey {
            url: "https://example.invalid".to_string(),
        }
        .into();
        assert!(err.is_config());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_auth_is_never_retryable() {
        let err = FuseError::Auth {
            status: 403,
            message: "forbidden".to_string(),
        };
        assert!(err.is_auth());
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transport_retryable() {
        // Retryable
        let conn: FuseError = TransportError::ConnectionFailed {
            message: "refused".to_string(),
        }
        .into();
        assert!(conn.is_transport());
        assert!(conn.is_retryable());

        let server: FuseError = TransportError::HttpStatus {
            status: 503,
            url: "u".to_string(),
        }
        .into();
        assert!(server.is_retryable());

        // Not retryable
        let not_found: FuseError = TransportError::HttpStatus {
            status: 404,
            url: "u".to_string(),
        }
        .into();
        assert!(!not_found.is_retryable());

        let app: FuseError = TransportError::Application {
            code: 7,
            message: "bad".to_string(),
        }
        .into();
        assert!(!app.is_retryable());
    }

    #[test]
    fn test_fuse_error_internal() {
        let err = FuseError::internal("unexpected state");
        assert!(!err.is_retryable());
        assert!(format!("{err}").contains("unexpected state"));
    }
}
