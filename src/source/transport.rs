//! HTTP transport seam for the remote export client.

use std::fmt;
use std::time::Duration;

use crate::error::{ConfigError, TransportError};

/// One outgoing GET request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    /// Absolute URL without query string.
    pub url: String,
    /// Query pairs; keys may repeat.
    pub query: Vec<(String, String)>,
    /// Request headers.
    pub headers: Vec<(String, String)>,
}

impl HttpRequest {
    /// The value of header `name`, if set.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Status and (decompressed) body of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpReply {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
}

impl HttpReply {
    /// A reply with a text body.
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Performs blocking GET requests.
pub trait HttpTransport: Send + Sync {
    /// Sends `request`. Only connection and body-read failures are errors;
    /// every HTTP status comes back as a reply.
    fn get(&self, request: &HttpRequest) -> Result<HttpReply, TransportError>;
}

/// Default transport over a blocking reqwest client with gzip enabled.
pub struct ReqwestTransport {
    client: reqwest::blocking::Client,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport").finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Builds the client with a per-request timeout.
    pub fn new(timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .gzip(true)
            .user_agent(concat!("scanfuse/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ConfigError::InvalidValue {
                key: "remote.transport".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&self, request: &HttpRequest) -> Result<HttpReply, TransportError> {
        let mut builder = self.client.get(&request.url).query(&request.query);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        let response = builder.send().map_err(|e| TransportError::ConnectionFailed {
            message: e.to_string(),
        })?;
        let status = response.status().as_u16();
        let body = response
            .bytes()
            .map_err(|e| TransportError::DeserializationFailed {
                message: format!("failed to read body: {e}"),
            })?;
        Ok(HttpReply {
            status,
            body: body.to_vec(),
        })
    }
}
