//! Result streams and run identifiers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::CancelHandle;
use crate::error::ExecutionError;
use crate::result::ItemResult;

/// Identifier of one `Engine::execute` call, used to correlate logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(Uuid);

impl RunId {
    /// Creates a new random run id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
pub(crate) struct RunCounters {
    pub(crate) submitted: AtomicU64,
    pub(crate) completed: AtomicU64,
}

/// Snapshot of a run's progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RunStats {
    /// Items handed to the worker pool.
    pub submitted: u64,
    /// Items whose worker call returned.
    pub completed: u64,
}

/// The streamed, unordered results of one run.
///
/// The stream ends (returns `None`) after every submitted item has been
/// delivered. Dropping it cancels the run.
#[derive(Debug)]
pub struct ResultStream {
    run_id: RunId,
    rx: Receiver<ItemResult>,
    cancel: CancelHandle,
    counters: Arc<RunCounters>,
}

impl ResultStream {
    pub(crate) fn new(
        run_id: RunId,
        rx: Receiver<ItemResult>,
        cancel: CancelHandle,
        counters: Arc<RunCounters>,
    ) -> Self {
        Self {
            run_id,
            rx,
            cancel,
            counters,
        }
    }

    /// The run this stream belongs to.
    #[must_use]
    pub const fn run_id(&self) -> RunId {
        self.run_id
    }

    /// Receive the next result (blocking). `None` once the run is finished.
    pub fn recv(&self) -> Option<ItemResult> {
        self.rx.recv().ok()
    }

    /// Receive the next result with a timeout.
    ///
    /// `Ok(None)` means the stream is closed.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<Option<ItemResult>, ExecutionError> {
        match self.rx.recv_timeout(timeout) {
            Ok(item) => Ok(Some(item)),
            Err(RecvTimeoutError::Disconnected) => Ok(None),
            Err(RecvTimeoutError::Timeout) => Err(ExecutionError::Timeout {
                duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
            }),
        }
    }

    /// Non-blocking receive. `Ok(None)` means nothing is buffered yet.
    pub fn try_recv(&self) -> Result<Option<ItemResult>, ExecutionError> {
        match self.rx.try_recv() {
            Ok(item) => Ok(Some(item)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(ExecutionError::Disconnected {
                path: "result_stream".to_string(),
            }),
        }
    }

    /// Stops scheduling new items. Results already in flight still arrive.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Progress counters.
    #[must_use]
    pub fn stats(&self) -> RunStats {
        RunStats {
            submitted: self.counters.submitted.load(Ordering::Acquire),
            completed: self.counters.completed.load(Ordering::Acquire),
        }
    }

    /// Drains the stream to completion.
    #[must_use]
    pub fn collect_all(self) -> Vec<ItemResult> {
        self.collect()
    }
}

impl Iterator for ResultStream {
    type Item = ItemResult;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

impl Drop for ResultStream {
    fn drop(&mut self) {
        // Unblocks producers: their sends fail once the receiver is gone.
        self.cancel.cancel();
    }
}
