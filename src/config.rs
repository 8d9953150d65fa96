//! Client and remote-source configuration.
//!
//! Plain structs with `Default`, (de)serializable with serde, plus an
//! environment loader reading `SCANFUSE_*` variables.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::context::{Context, EngineOptions, DEFAULT_BUFFER, DEFAULT_ITEM_TIMEOUT, DEFAULT_THREADS};
use crate::error::ConfigError;

/// Prefix of every environment variable read by [`ClientConfig::from_env`].
pub const ENV_PREFIX: &str = "SCANFUSE_";

/// Remote export API settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// Base URL, e.g. `https://defs.example.com`.
    pub base_url: String,
    /// Value of the `X-API-Key` header.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub timeout_ms: u64,
    /// Attempts per request, including the first.
    pub max_attempts: u32,
    /// Base delay; attempt `n` waits `n * backoff`.
    pub backoff_ms: u64,
    /// Page size used when fetching a full export.
    pub page_size: u32,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            api_key: None,
            timeout_ms: 10_000,
            max_attempts: 3,
            backoff_ms: 500,
            page_size: 500,
        }
    }
}

impl RemoteConfig {
    /// Config for `base_url` with an optional key and default tuning.
    #[must_use]
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            ..Self::default()
        }
    }

    /// Sets the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, max_attempts: u32, backoff: Duration) -> Self {
        self.max_attempts = max_attempts;
        self.backoff_ms = backoff.as_millis() as u64;
        self
    }

    /// Request timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Base retry delay.
    #[must_use]
    pub const fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }

    /// The key, if it is set and not blank.
    #[must_use]
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }

    /// Checks the URL, the key and the tuning values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                key: "remote.base_url".to_string(),
                reason: format!("'{url}' is not an http(s) URL"),
            });
        }
        if self.api_key().is_none() {
            return Err(ConfigError::MissingApiKey {
                url: url.to_string(),
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                key: "remote.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.page_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "remote.page_size".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Top-level client configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Remote export API; `None` means local data only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteConfig>,
    /// Workers per run.
    pub threads: usize,
    /// Per-item timeout.
    pub item_timeout_ms: u64,
    /// Result buffer capacity.
    pub buffer: usize,
    /// Engine options for contexts built from this config.
    pub options: EngineOptions,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            remote: None,
            threads: DEFAULT_THREADS,
            item_timeout_ms: DEFAULT_ITEM_TIMEOUT.as_millis() as u64,
            buffer: DEFAULT_BUFFER,
            options: EngineOptions::default(),
        }
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

impl ClientConfig {
    /// Reads `SCANFUSE_REMOTE_URL`, `SCANFUSE_API_KEY`, `SCANFUSE_THREADS`,
    /// `SCANFUSE_TIMEOUT_MS`, `SCANFUSE_MAX_ATTEMPTS` and
    /// `SCANFUSE_BACKOFF_MS`. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Like [`ClientConfig::from_env`] with a custom variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| {
            let key = format!("{ENV_PREFIX}{suffix}");
            lookup(&key)
                .filter(|v| !v.trim().is_empty())
                .map(|v| (key, v))
        };

        let mut config = Self::default();
        if let Some((key, v)) = var("THREADS") {
            config.threads = parse_var::<usize>(&key, &v)?.max(1);
        }
        if let Some((key, v)) = var("TIMEOUT_MS") {
            config.item_timeout_ms = parse_var(&key, &v)?;
        }

        if let Some((_, url)) = var("REMOTE_URL") {
            let mut remote = RemoteConfig::new(url.trim(), var("API_KEY").map(|(_, k)| k));
            if let Some((key, v)) = var("MAX_ATTEMPTS") {
                remote.max_attempts = parse_var(&key, &v)?;
            }
            if let Some((key, v)) = var("BACKOFF_MS") {
                remote.backoff_ms = parse_var(&key, &v)?;
            }
            config.remote = Some(remote);
        }
        Ok(config)
    }

    /// Checks the remote section, when present.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.remote {
            Some(remote) => remote.validate(),
            None => Ok(()),
        }
    }

    /// A fresh context carrying these defaults.
    #[must_use]
    pub fn context(&self) -> Context {
        Context::new()
            .with_threads(self.threads)
            .with_item_timeout(Duration::from_millis(self.item_timeout_ms))
            .with_buffer(self.buffer)
            .with_options(self.options.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert!(config.validate().is_ok());
        assert_eq!(config.context().threads(), DEFAULT_THREADS);
    }

    #[test]
    fn reads_remote_settings() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("SCANFUSE_REMOTE_URL", "https://defs.example.com"),
            ("SCANFUSE_API_KEY", "k-123"),
            ("SCANFUSE_THREADS", "8"),
            ("SCANFUSE_MAX_ATTEMPTS", "5"),
            ("SCANFUSE_BACKOFF_MS", "20"),
        ]))
        .unwrap();
        let remote = config.remote.as_ref().unwrap();
        assert_eq!(remote.api_key(), Some("k-123"));
        assert_eq!(remote.max_attempts, 5);
        assert_eq!(remote.backoff(), Duration::from_millis(20));
        assert_eq!(config.threads, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn url_without_key_fails_validation() {
        let vars = [("SCANFUSE_REMOTE_URL", "https://defs.example.com")];
        let config = ClientConfig::from_lookup(lookup(&vars)).unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::MissingApiKey { .. })
        ));
    }

    #[test]
    fn bad_number_names_the_variable() {
        let err = ClientConfig::from_lookup(lookup(&[("SCANFUSE_THREADS", "many")])).unwrap_err();
        assert!(format!("{err}").contains("SCANFUSE_THREADS"));
    }

    #[test]
    fn rejects_non_http_url() {
        let remote = RemoteConfig::new("ftp://x", Some("k".to_string()));
        assert!(matches!(
            remote.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
