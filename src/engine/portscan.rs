//! Port scan engine: targets x ports.

use std::io::{self, Read};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::context::{Context, ScanOptions};
use crate::error::{ExecutionError, FuseResult};
use crate::result::{ItemResult, PortObservation, ResultData};
use crate::targets::Endpoint;
use crate::task::{Task, TaskKind};

use super::{Engine, EngineCore, Executor, ResultStream};

/// Registry name.
pub const NAME: &str = "portscan";

/// Probes one TCP endpoint.
pub trait PortProber: Send + Sync {
    /// Returns the observation for `endpoint`. A closed port is an
    /// observation, not an error.
    fn probe(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
        options: &ScanOptions,
    ) -> Result<PortObservation, ExecutionError>;
}

/// Full TCP connect probe with optional banner grab.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnectProber;

fn millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn read_banner(stream: &mut TcpStream, timeout: Duration, limit: usize) -> Option<String> {
    stream.set_read_timeout(Some(timeout)).ok()?;
    let mut buf = Vec::with_capacity(limit.min(4096));
    match stream.take(limit as u64).read_to_end(&mut buf) {
        Ok(_) => {}
        // Timeouts are expected for services that keep the connection open.
        Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {}
        Err(_) => return None,
    }
    let text = String::from_utf8_lossy(&buf).trim().to_string();
    (!text.is_empty()).then_some(text)
}

impl PortProber for TcpConnectProber {
    fn probe(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
        options: &ScanOptions,
    ) -> Result<PortObservation, ExecutionError> {
        let failed = |message: String| ExecutionError::ProbeFailed {
            target: endpoint.to_string(),
            message,
        };
        let addr = (endpoint.host.as_str(), endpoint.port)
            .to_socket_addrs()
            .map_err(|e| failed(format!("resolve failed: {e}")))?
            .next()
            .ok_or_else(|| failed("host resolved to no addresses".to_string()))?;

        let started = Instant::now();
        let mut observation = PortObservation {
            host: endpoint.host.clone(),
            port: endpoint.port,
            open: false,
            banner: None,
            latency_ms: 0,
        };
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(mut stream) => {
                observation.open = true;
                observation.latency_ms = millis(started.elapsed());
                if options.grab_banner {
                    observation.banner = read_banner(&mut stream, timeout, options.banner_limit);
                }
                Ok(observation)
            }
            Err(e) if e.kind() == io::ErrorKind::ConnectionRefused => {
                observation.latency_ms = millis(started.elapsed());
                Ok(observation)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Err(ExecutionError::Timeout {
                duration_ms: millis(timeout),
            }),
            Err(e) => Err(failed(e.to_string())),
        }
    }
}

/// Scans every host of a target expression against every listed port.
pub struct PortScanEngine {
    core: EngineCore,
    prober: Arc<dyn PortProber>,
}

impl PortScanEngine {
    /// Creates the engine.
    #[must_use]
    pub fn new(prober: Arc<dyn PortProber>) -> Self {
        Self {
            core: EngineCore::new(NAME, &[TaskKind::Scan]),
            prober,
        }
    }

    /// The engine's executor.
    #[must_use]
    pub const fn executor(&self) -> &Executor {
        self.core.executor()
    }
}

impl Engine for PortScanEngine {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn execute(&self, ctx: &Context, task: Task) -> FuseResult<ResultStream> {
        self.core.admit(&task)?;
        let scan = match task {
            Task::Scan(scan) => scan,
            Task::Match(_) | Task::ProbeExecute(_) | Task::Check(_) | Task::Brute(_) => {
                return Err(self.core.unhandled(task.kind()));
            }
        };
        let (targets, ports) = scan.workload()?;

        // Host-major order: every port of the first host, then the next host.
        let items = targets.hosts().into_iter().flat_map(move |host| {
            ports
                .clone()
                .into_iter()
                .map(move |port| Endpoint::new(host.clone(), port))
        });

        let prober = Arc::clone(&self.prober);
        self.core.executor().spawn_labeled(
            ctx,
            items,
            Endpoint::to_string,
            move |endpoint, ctx| {
                ItemResult::from_outcome(
                    prober
                        .probe(&endpoint, ctx.item_timeout(), &ctx.options().scan)
                        .map(ResultData::Port),
                )
            },
        )
    }

    fn close(&self) -> FuseResult<()> {
        self.core.close();
        Ok(())
    }
}
