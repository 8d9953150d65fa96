//! Execution context: cancellation, deadlines and per-engine options.
//!
//! A `Context` is built once (by-value `with_*` setters on a value nobody
//! else can see yet) and is read-only afterwards. Every derivation returns a
//! new value that shares the cancellation tree of its parent: cancelling a
//! parent cancels its descendants, never the other way around.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

/// Default number of workers per run.
pub const DEFAULT_THREADS: usize = 25;

/// Default per-item timeout.
pub const DEFAULT_ITEM_TIMEOUT: Duration = Duration::from_secs(5);

/// Default result buffer capacity.
pub const DEFAULT_BUFFER: usize = 256;

#[derive(Debug)]
struct CancelNode {
    cancelled: AtomicBool,
    parent: Option<Arc<CancelNode>>,
}

impl CancelNode {
    fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Acquire) {
            return true;
        }
        let mut cur = self.parent.as_deref();
        while let Some(node) = cur {
            if node.cancelled.load(Ordering::Acquire) {
                return true;
            }
            cur = node.parent.as_deref();
        }
        false
    }
}

/// Cooperative cancellation token with an optional deadline.
#[derive(Debug, Clone)]
pub struct CancelToken {
    node: Arc<CancelNode>,
    deadline: Option<Instant>,
}

impl CancelToken {
    fn root() -> Self {
        Self {
            node: Arc::new(CancelNode {
                cancelled: AtomicBool::new(false),
                parent: None,
            }),
            deadline: None,
        }
    }

    fn child(&self) -> (Self, CancelHandle) {
        let node = Arc::new(CancelNode {
            cancelled: AtomicBool::new(false),
            parent: Some(Arc::clone(&self.node)),
        });
        let handle = CancelHandle {
            node: Arc::clone(&node),
        };
        (
            Self {
                node,
                deadline: self.deadline,
            },
            handle,
        )
    }

    /// True once this token, any ancestor, or the deadline has fired.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return true;
            }
        }
        self.node.is_cancelled()
    }

    /// The deadline, if any.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

/// Cancels the context it was created with (and everything derived from it).
#[derive(Debug, Clone)]
pub struct CancelHandle {
    node: Arc<CancelNode>,
}

impl CancelHandle {
    /// Fires the cancellation. Idempotent.
    pub fn cancel(&self) {
        self.node.cancelled.store(true, Ordering::Release);
    }

    /// True once `cancel` has been called on this handle.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.node.cancelled.load(Ordering::Acquire)
    }
}

/// Port-scan options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanOptions {
    /// Read a service banner after connecting.
    pub grab_banner: bool,
    /// Maximum banner bytes to keep.
    pub banner_limit: usize,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            grab_banner: false,
            banner_limit: 512,
        }
    }
}

/// How aggressive probe definitions may be.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeMode {
    /// Detection only.
    #[default]
    Verify,
    /// Allow exploit-mode definitions.
    Exploit,
}

/// Vulnerability-probe options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeOptions {
    /// Verify or exploit. Verify mode only sends GET and HEAD requests.
    pub mode: ProbeMode,
}

/// HTTP prober options.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpOptions {
    /// Follow redirects.
    pub follow_redirects: bool,
    /// User agent header.
    pub user_agent: String,
    /// Status codes that count as hits; empty means every status.
    pub match_status: Vec<u16>,
    /// Maximum body bytes to keep.
    pub body_limit: usize,
}

impl Default for HttpOptions {
    fn default() -> Self {
        Self {
            follow_redirects: false,
            user_agent: concat!("scanfuse/", env!("CARGO_PKG_VERSION")).to_string(),
            match_status: Vec::new(),
            body_limit: 64 * 1024,
        }
    }
}

/// Engine-specific options carried by a context.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineOptions {
    /// Port-scan options.
    pub scan: ScanOptions,
    /// Probe options.
    pub probe: ProbeOptions,
    /// HTTP options.
    pub http: HttpOptions,
}

/// Cancellation/timeout/options carrier passed alongside a task.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancelToken,
    threads: usize,
    item_timeout: Duration,
    buffer: usize,
    options: Arc<EngineOptions>,
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl Context {
    /// A fresh, uncancelled context with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self {
            token: CancelToken::root(),
            threads: DEFAULT_THREADS,
            item_timeout: DEFAULT_ITEM_TIMEOUT,
            buffer: DEFAULT_BUFFER,
            options: Arc::new(EngineOptions::default()),
        }
    }

    /// Sets the worker count (minimum 1).
    #[must_use]
    pub fn with_threads(mut self, threads: usize) -> Self {
        self.threads = threads.max(1);
        self
    }

    /// Sets the per-item timeout handed to collaborators.
    #[must_use]
    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }

    /// Sets the result buffer capacity (minimum 1).
    #[must_use]
    pub fn with_buffer(mut self, buffer: usize) -> Self {
        self.buffer = buffer.max(1);
        self
    }

    /// Replaces the engine options.
    #[must_use]
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = Arc::new(options);
        self
    }

    /// Derives a context whose deadline is at most `timeout` from now.
    #[must_use]
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derives a context with an absolute deadline (the earlier one wins).
    #[must_use]
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut next = self.clone();
        next.token.deadline = Some(match self.token.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        next
    }

    /// Derives a cancellable context and the handle that cancels it.
    #[must_use]
    pub fn with_cancel(&self) -> (Self, CancelHandle) {
        let (token, handle) = self.token.child();
        let mut next = self.clone();
        next.token = token;
        (next, handle)
    }

    /// True once cancelled or past the deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// The cancellation token.
    #[must_use]
    pub const fn cancel_token(&self) -> &CancelToken {
        &self.token
    }

    /// Time left before the deadline, if one is set.
    #[must_use]
    pub fn remaining(&self) -> Option<Duration> {
        self.token
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Worker count.
    #[must_use]
    pub const fn threads(&self) -> usize {
        self.threads
    }

    /// Per-item timeout, clamped to the remaining deadline.
    #[must_use]
    pub fn item_timeout(&self) -> Duration {
        match self.remaining() {
            Some(left) => self.item_timeout.min(left),
            None => self.item_timeout,
        }
    }

    /// Result buffer capacity.
    #[must_use]
    pub const fn buffer(&self) -> usize {
        self.buffer
    }

    /// Engine options.
    #[must_use]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }
}
