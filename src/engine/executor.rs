//! Bounded fan-out/fan-in worker pool.
//!
//! One run = one dispatcher thread plus `ctx.threads()` worker threads.
//! The dispatcher enumerates items in order, checks cancellation before each
//! submission, and pushes them into a bounded job queue. Workers call the
//! item closure and deliver results with a blocking send on a bounded result
//! channel: a slow consumer throttles producers, nothing is dropped. After
//! the last worker has been joined the dispatcher drops the final result
//! sender, which closes the stream exactly once.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, error, warn};

use crate::context::{CancelHandle, Context};
use crate::error::{ExecutionError, FuseResult};
use crate::result::ItemResult;

use super::stream::{ResultStream, RunCounters, RunId};

/// Decrements the live-thread gauge when the owning thread exits.
struct LiveGuard(Arc<AtomicUsize>);

impl LiveGuard {
    fn enter(gauge: &Arc<AtomicUsize>) -> Self {
        gauge.fetch_add(1, Ordering::AcqRel);
        Self(Arc::clone(gauge))
    }
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Worker-pool executor shared by the engines.
#[derive(Debug, Clone)]
pub struct Executor {
    name: Arc<str>,
    live: Arc<AtomicUsize>,
}

impl Executor {
    /// Creates an executor; `name` prefixes its thread names.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: Arc::from(name),
            live: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Dispatcher and worker threads of this executor that are still alive.
    #[must_use]
    pub fn live_threads(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Fans `items` out across a bounded pool and streams the results back.
    ///
    /// `items` is consumed lazily on the dispatcher thread, so enumeration
    /// stops as soon as the context is cancelled. A panicking item is
    /// reported under its `Debug` form.
    pub fn spawn<I, W>(&self, ctx: &Context, items: I, work: W) -> FuseResult<ResultStream>
    where
        I: IntoIterator + Send + 'static,
        I::Item: fmt::Debug + Send + 'static,
        W: Fn(I::Item, &Context) -> ItemResult + Send + Sync + 'static,
    {
        self.spawn_labeled(ctx, items, |item: &I::Item| format!("{item:?}"), work)
    }

    /// Like [`Executor::spawn`], naming each item with `label` in the
    /// failed result a panic produces.
    pub fn spawn_labeled<I, L, W>(
        &self,
        ctx: &Context,
        items: I,
        label: L,
        work: W,
    ) -> FuseResult<ResultStream>
    where
        I: IntoIterator + Send + 'static,
        I::Item: Send + 'static,
        L: Fn(&I::Item) -> String + Send + Sync + 'static,
        W: Fn(I::Item, &Context) -> ItemResult + Send + Sync + 'static,
    {
        let run_id = RunId::new();
        let (run_ctx, run_cancel) = ctx.with_cancel();
        let (result_tx, result_rx) = bounded::<ItemResult>(ctx.buffer());
        let counters = Arc::new(RunCounters::default());

        let dispatch = Dispatch {
            name: Arc::clone(&self.name),
            run_id,
            ctx: run_ctx,
            cancel: run_cancel.clone(),
            counters: Arc::clone(&counters),
            live: Arc::clone(&self.live),
        };

        let guard = LiveGuard::enter(&self.live);
        thread::Builder::new()
            .name(format!("scanfuse-{}-dispatch", self.name))
            .spawn(move || {
                dispatch.run(items, Arc::new(label), Arc::new(work), result_tx, guard);
            })
            .map_err(|e| ExecutionError::Spawn {
                message: e.to_string(),
            })?;

        Ok(ResultStream::new(run_id, result_rx, run_cancel, counters))
    }
}

struct Dispatch {
    name: Arc<str>,
    run_id: RunId,
    ctx: Context,
    cancel: CancelHandle,
    counters: Arc<RunCounters>,
    live: Arc<AtomicUsize>,
}

impl Dispatch {
    fn run<I, L, W>(
        self,
        items: I,
        label: Arc<L>,
        work: Arc<W>,
        result_tx: Sender<ItemResult>,
        guard: LiveGuard,
    ) where
        I: IntoIterator,
        I::Item: Send + 'static,
        L: Fn(&I::Item) -> String + Send + Sync + 'static,
        W: Fn(I::Item, &Context) -> ItemResult + Send + Sync + 'static,
    {
        if self.ctx.is_cancelled() {
            debug!(run_id = %self.run_id, engine = %self.name, "context cancelled before start");
            drop(guard);
            drop(result_tx);
            return;
        }

        let items = items.into_iter();
        let threads = match items.size_hint() {
            (_, Some(upper)) => self.ctx.threads().min(upper.max(1)),
            (_, None) => self.ctx.threads(),
        };
        debug!(run_id = %self.run_id, engine = %self.name, threads, "run started");

        let (job_tx, job_rx) = bounded::<I::Item>(threads);
        let mut workers: Vec<JoinHandle<()>> = Vec::with_capacity(threads);
        for idx in 0..threads {
            let spawned = self.spawn_worker(
                idx,
                job_rx.clone(),
                result_tx.clone(),
                Arc::clone(&label),
                Arc::clone(&work),
            );
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(e) => warn!(run_id = %self.run_id, error = %e, "failed to spawn worker"),
            }
        }
        // Workers own the only receivers; if they all exit, sends fail.
        drop(job_rx);

        for item in items {
            if self.ctx.is_cancelled() {
                debug!(run_id = %self.run_id, "cancelled, stopping enumeration");
                break;
            }
            if job_tx.send(item).is_err() {
                break;
            }
            self.counters.submitted.fetch_add(1, Ordering::AcqRel);
        }
        drop(job_tx);

        for handle in workers {
            if handle.join().is_err() {
                error!(run_id = %self.run_id, "worker thread panicked outside item execution");
            }
        }

        debug!(
            run_id = %self.run_id,
            submitted = self.counters.submitted.load(Ordering::Acquire),
            completed = self.counters.completed.load(Ordering::Acquire),
            "run finished"
        );

        // Gauge first, then close: a consumer that sees the end of the
        // stream never observes this run's threads as alive.
        drop(guard);
        drop(result_tx);
    }

    fn spawn_worker<T, L, W>(
        &self,
        idx: usize,
        jobs: Receiver<T>,
        results: Sender<ItemResult>,
        label: Arc<L>,
        work: Arc<W>,
    ) -> std::io::Result<JoinHandle<()>>
    where
        T: Send + 'static,
        L: Fn(&T) -> String + Send + Sync + 'static,
        W: Fn(T, &Context) -> ItemResult + Send + Sync + 'static,
    {
        let ctx = self.ctx.clone();
        let cancel = self.cancel.clone();
        let counters = Arc::clone(&self.counters);
        let guard = LiveGuard::enter(&self.live);
        thread::Builder::new()
            .name(format!("scanfuse-{}-{idx}", self.name))
            .spawn(move || {
                let _guard = guard;
                while let Ok(item) = jobs.recv() {
                    let target = label(&item);
                    let result = catch_unwind(AssertUnwindSafe(|| work(item, &ctx)))
                        .unwrap_or_else(|_| {
                            warn!(target_item = %target, "work item panicked");
                            ItemResult::failed(ExecutionError::ProbeFailed {
                                target,
                                message: "worker panicked while probing".to_string(),
                            })
                        });
                    counters.completed.fetch_add(1, Ordering::AcqRel);
                    if results.send(result).is_err() {
                        // Consumer is gone.
                        cancel.cancel();
                        break;
                    }
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU64;
    use std::time::{Duration, Instant};

    use super::*;
    use crate::result::ResultData;

    fn wait_for_idle(exec: &Executor) {
        let started = Instant::now();
        while exec.live_threads() != 0 {
            assert!(started.elapsed() < Duration::from_secs(5), "executor threads leaked");
            thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn every_item_yields_one_result() {
        let exec = Executor::new("test");
        let ctx = Context::new().with_threads(3);
        let stream = exec
            .spawn(&ctx, 0..20u32, |n, _| {
                if n % 5 == 0 {
                    ItemResult::failed(ExecutionError::ProbeFailed {
                        target: n.to_string(),
                        message: "refused".to_string(),
                    })
                } else {
                    ItemResult::ok(ResultData::Empty)
                }
            })
            .unwrap();

        let results = stream.collect_all();
        assert_eq!(results.len(), 20);
        assert_eq!(results.iter().filter(|r| !r.success()).count(), 4);
        wait_for_idle(&exec);
    }

    #[test]
    fn pre_cancelled_context_submits_nothing() {
        let exec = Executor::new("test");
        let (ctx, cancel) = Context::new().with_cancel();
        cancel.cancel();

        let calls = Arc::new(AtomicU64::new(0));
        let seen = Arc::clone(&calls);
        let stream = exec
            .spawn(&ctx, 0..10u32, move |_, _| {
                seen.fetch_add(1, Ordering::Relaxed);
                ItemResult::ok(ResultData::Empty)
            })
            .unwrap();

        assert!(stream.recv_timeout(Duration::from_secs(5)).unwrap().is_none());
        assert_eq!(stream.stats().submitted, 0);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
        wait_for_idle(&exec);
    }

    #[test]
    fn concurrency_never_exceeds_thread_count() {
        let exec = Executor::new("test");
        let ctx = Context::new().with_threads(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let stream = exec
            .spawn(&ctx, 0..30u32, move |_, _| {
                let now = f.fetch_add(1, Ordering::AcqRel) + 1;
                p.fetch_max(now, Ordering::AcqRel);
                thread::sleep(Duration::from_millis(2));
                f.fetch_sub(1, Ordering::AcqRel);
                ItemResult::ok(ResultData::Empty)
            })
            .unwrap();

        assert_eq!(stream.collect_all().len(), 30);
        assert!(peak.load(Ordering::Acquire) <= 3);
        wait_for_idle(&exec);
    }

    #[test]
    fn blocking_delivery_loses_nothing_under_backpressure() {
        let exec = Executor::new("test");
        let ctx = Context::new().with_threads(4).with_buffer(1);
        let stream = exec
            .spawn(&ctx, 0..40u32, |_, _| ItemResult::ok(ResultData::Empty))
            .unwrap();

        let mut received = 0;
        while let Some(_r) = stream.recv() {
            thread::sleep(Duration::from_millis(1));
            received += 1;
        }
        assert_eq!(received, 40);
        wait_for_idle(&exec);
    }

    #[test]
    fn panicking_item_becomes_failed_result() {
        let exec = Executor::new("test");
        let ctx = Context::new().with_threads(2);
        let stream = exec
            .spawn(&ctx, 0..4u32, |n, _| {
                assert!(n != 2, "boom");
                ItemResult::ok(ResultData::Empty)
            })
            .unwrap();

        let results = stream.collect_all();
        assert_eq!(results.len(), 4);
        let failed: Vec<_> = results.iter().filter(|r| !r.success()).collect();
        assert_eq!(failed.len(), 1);
        assert!(matches!(
            failed[0].error(),
            Some(ExecutionError::ProbeFailed { target, .. }) if target == "2"
        ));
        wait_for_idle(&exec);
    }

    #[test]
    fn labeled_panics_name_the_item() {
        let exec = Executor::new("test");
        let ctx = Context::new().with_threads(1);
        let stream = exec
            .spawn_labeled(
                &ctx,
                vec!["alpha".to_string(), "beta".to_string()],
                |host: &String| format!("host {host}"),
                |host, _| {
                    assert!(host != "beta", "boom");
                    ItemResult::ok(ResultData::Empty)
                },
            )
            .unwrap();

        let results = stream.collect_all();
        let targets: Vec<&str> = results
            .iter()
            .filter_map(|r| match r.error() {
                Some(ExecutionError::ProbeFailed { target, .. }) => Some(target.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(targets, vec!["host beta"]);
        wait_for_idle(&exec);
    }

    #[test]
    fn dropping_stream_winds_the_run_down() {
        let exec = Executor::new("test");
        let ctx = Context::new().with_threads(2).with_buffer(1);
        let stream = exec
            .spawn(&ctx, 0..10_000u32, |_, _| {
                thread::sleep(Duration::from_millis(1));
                ItemResult::ok(ResultData::Empty)
            })
            .unwrap();

        assert!(stream.recv().is_some());
        drop(stream);
        wait_for_idle(&exec);
    }
}
