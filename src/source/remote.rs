//! Client for the remote fingerprint/probe export API.

use std::fmt;
use std::sync::Arc;
use std::thread;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RemoteConfig;
use crate::error::{FuseError, FuseResult, TransportError};
use crate::record::{Fingerprint, ProbeDefinition};

use super::query::ExportQuery;
use super::transport::{HttpReply, HttpRequest, HttpTransport, ReqwestTransport};
use super::DataSource;

/// Upper bound on pages fetched for one full export.
const MAX_PAGES: u32 = 10_000;

/// Longest response excerpt carried in an auth error.
const MAX_ERROR_BODY: usize = 256;

/// The `data` member of an export envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportPage<T> {
    /// Records on this page.
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    /// Total matching records across all pages.
    #[serde(default)]
    pub total: u64,
}

impl<T> Default for ExportPage<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            total: 0,
        }
    }
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    code: i64,
    #[serde(default)]
    message: String,
    #[serde(default = "Option::default")]
    data: Option<ExportPage<T>>,
}

/// Which export endpoint to call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    /// `/api/v1/fingerprints/export`.
    Fingerprints,
    /// `/api/v1/probes/export`.
    Probes,
}

impl ExportKind {
    const fn path(self) -> &'static str {
        match self {
            Self::Fingerprints => "fingerprints",
            Self::Probes => "probes",
        }
    }
}

/// Remote data source with linear-backoff retries.
pub struct RemoteSource {
    config: RemoteConfig,
    api_key: String,
    transport: Arc<dyn HttpTransport>,
}

impl fmt::Debug for RemoteSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteSource")
            .field("base_url", &self.config.base_url)
            .field("max_attempts", &self.config.max_attempts)
            .finish_non_exhaustive()
    }
}

impl RemoteSource {
    /// Validates `config` and builds the default reqwest transport.
    pub fn new(config: RemoteConfig) -> FuseResult<Self> {
        config.validate()?;
        let transport = ReqwestTransport::new(config.timeout())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Validates `config` and uses `transport` for every request.
    pub fn with_transport(
        config: RemoteConfig,
        transport: Arc<dyn HttpTransport>,
    ) -> FuseResult<Self> {
        config.validate()?;
        let api_key = config.api_key().unwrap_or_default().to_string();
        Ok(Self {
            config,
            api_key,
            transport,
        })
    }

    fn endpoint(&self, kind: ExportKind) -> String {
        format!(
            "{}/api/v1/{}/export",
            self.config.base_url.trim().trim_end_matches('/'),
            kind.path()
        )
    }

    /// Fetches one page exactly as `query` describes it.
    pub fn fetch_page<T: DeserializeOwned>(
        &self,
        kind: ExportKind,
        query: &ExportQuery,
    ) -> FuseResult<ExportPage<T>> {
        let request = HttpRequest {
            url: self.endpoint(kind),
            query: query.to_params(),
            headers: vec![
                ("X-API-Key".to_string(), self.api_key.clone()),
                ("Accept".to_string(), "application/json".to_string()),
            ],
        };
        self.with_retry(&request)
    }

    /// Fetches every record matching `query`. A paginated query fetches only
    /// the page it names.
    pub fn fetch_all<T: DeserializeOwned>(
        &self,
        kind: ExportKind,
        query: &ExportQuery,
    ) -> FuseResult<Vec<T>> {
        if query.is_paginated() {
            return Ok(self.fetch_page(kind, query)?.items);
        }

        let page_size = self.config.page_size;
        let mut out: Vec<T> = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch: ExportPage<T> =
                self.fetch_page(kind, &query.clone().with_page(page, page_size))?;
            let received = batch.items.len();
            out.extend(batch.items);
            debug!(kind = kind.path(), page, received, total = batch.total, "export page fetched");
            if received == 0 || out.len() as u64 >= batch.total {
                break;
            }
        }
        Ok(out)
    }

    fn with_retry<T: DeserializeOwned>(&self, request: &HttpRequest) -> FuseResult<ExportPage<T>> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt: u32 = 1;
        loop {
            match self.attempt(request) {
                Ok(page) => return Ok(page),
                Err(err) if err.is_retryable() && attempt < attempts => {
                    let delay = self.config.backoff() * attempt;
                    warn!(
                        url = %request.url,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "remote export request failed, retrying"
                    );
                    thread::sleep(delay);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn attempt<T: DeserializeOwned>(&self, request: &HttpRequest) -> FuseResult<ExportPage<T>> {
        let HttpReply { status, body } = self.transport.get(request)?;
        match status {
            200..=299 => {}
            401 | 403 => {
                let text = String::from_utf8_lossy(&body);
                let message: String = text.chars().take(MAX_ERROR_BODY).collect();
                return Err(FuseError::Auth { status, message });
            }
            _ => {
                return Err(TransportError::HttpStatus {
                    status,
                    url: request.url.clone(),
                }
                .into())
            }
        }

        let envelope: Envelope<T> =
            serde_json::from_slice(&body).map_err(|e| TransportError::DeserializationFailed {
                message: e.to_string(),
            })?;
        if envelope.code != 0 {
            return Err(TransportError::Application {
                code: envelope.code,
                message: envelope.message,
            }
            .into());
        }
        Ok(envelope.data.unwrap_or_default())
    }
}

impl DataSource for RemoteSource {
    fn name(&self) -> &str {
        "remote"
    }

    fn fingerprints(&self, query: &ExportQuery) -> FuseResult<Vec<Fingerprint>> {
        self.fetch_all(ExportKind::Fingerprints, query)
    }

    fn probes(&self, query: &ExportQuery) -> FuseResult<Vec<ProbeDefinition>> {
        self.fetch_all(ExportKind::Probes, query)
    }
}
