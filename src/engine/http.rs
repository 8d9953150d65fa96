//! HTTP batch prober: URL checks and path brute force.

use std::fmt;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{SERVER, USER_AGENT};
use reqwest::redirect::Policy;
use reqwest::Method;

use crate::context::{Context, HttpOptions};
use crate::error::{ConfigError, ExecutionError, FuseResult};
use crate::pattern::cached_regex;
use crate::result::{HttpObservation, ItemResult, ResultData};
use crate::task::{Task, TaskKind};

use super::{Engine, EngineCore, Executor, ResultStream};

/// Registry name.
pub const NAME: &str = "http";

/// Fetches one URL.
pub trait HttpProber: Send + Sync {
    /// Issues `method url` and summarizes the response.
    fn fetch(
        &self,
        method: &str,
        url: &str,
        timeout: Duration,
        options: &HttpOptions,
    ) -> Result<HttpObservation, ExecutionError>;
}

/// Extracts the contents of the first `<title>` element.
#[must_use]
pub fn extract_title(body: &str) -> Option<String> {
    let re = cached_regex(r"(?is)<title[^>]*>(.*?)</title>").ok()?;
    let title = re.captures(body)?.get(1)?.as_str().trim();
    (!title.is_empty()).then(|| title.split_whitespace().collect::<Vec<_>>().join(" "))
}

/// Default prober over blocking reqwest clients.
pub struct ReqwestProber {
    follow: Client,
    no_follow: Client,
}

impl fmt::Debug for ReqwestProber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestProber").finish_non_exhaustive()
    }
}

impl ReqwestProber {
    /// Builds the redirect-following and non-following clients.
    pub fn new() -> Result<Self, ConfigError> {
        let build = |policy: Policy| {
            Client::builder()
                .redirect(policy)
                .gzip(true)
                .build()
                .map_err(|e| ConfigError::InvalidValue {
                    key: "http.client".to_string(),
                    reason: e.to_string(),
                })
        };
        Ok(Self {
            follow: build(Policy::limited(10))?,
            no_follow: build(Policy::none())?,
        })
    }
}

impl HttpProber for ReqwestProber {
    fn fetch(
        &self,
        method: &str,
        url: &str,
        timeout: Duration,
        options: &HttpOptions,
    ) -> Result<HttpObservation, ExecutionError> {
        let failed = |message: String| ExecutionError::ProbeFailed {
            target: url.to_string(),
            message,
        };
        let method = Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|e| failed(format!("bad method: {e}")))?;
        let client = if options.follow_redirects {
            &self.follow
        } else {
            &self.no_follow
        };

        let response = client
            .request(method, url)
            .timeout(timeout)
            .header(USER_AGENT, options.user_agent.as_str())
            .send()
            .map_err(|e| {
                if e.is_timeout() {
                    ExecutionError::Timeout {
                        duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                    }
                } else {
                    failed(e.to_string())
                }
            })?;

        let status = response.status().as_u16();
        let server = response
            .headers()
            .get(SERVER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut raw = Vec::new();
        response
            .take(options.body_limit as u64)
            .read_to_end(&mut raw)
            .map_err(|e| failed(format!("failed to read body: {e}")))?;
        let body = String::from_utf8_lossy(&raw).into_owned();

        Ok(HttpObservation {
            url: url.to_string(),
            status,
            hit: options.match_status.is_empty() || options.match_status.contains(&status),
            content_length: raw.len(),
            title: extract_title(&body),
            server,
            body,
        })
    }
}

/// Runs `Check` (URL list) and `Brute` (base URL x wordlist) tasks.
pub struct HttpEngine {
    core: EngineCore,
    prober: Arc<dyn HttpProber>,
}

impl HttpEngine {
    /// Creates the engine.
    #[must_use]
    pub fn new(prober: Arc<dyn HttpProber>) -> Self {
        Self {
            core: EngineCore::new(NAME, &[TaskKind::Check, TaskKind::Brute]),
            prober,
        }
    }

    /// The engine's executor.
    #[must_use]
    pub const fn executor(&self) -> &Executor {
        self.core.executor()
    }
}

impl Engine for HttpEngine {
    fn name(&self) -> &str {
        self.core.name()
    }

    fn execute(&self, ctx: &Context, task: Task) -> FuseResult<ResultStream> {
        self.core.admit(&task)?;
        let urls: Vec<String> = match task {
            Task::Check(check) => check
                .urls
                .into_iter()
                .map(|u| u.trim().to_string())
                .collect(),
            Task::Brute(brute) => brute.urls(),
            Task::Scan(_) | Task::Match(_) | Task::ProbeExecute(_) => {
                return Err(self.core.unhandled(task.kind()));
            }
        };

        let prober = Arc::clone(&self.prober);
        self.core
            .executor()
            .spawn_labeled(ctx, urls, String::clone, move |url, ctx| {
                ItemResult::from_outcome(
                    prober
                        .fetch("GET", &url, ctx.item_timeout(), &ctx.options().http)
                        .map(ResultData::Http),
                )
            })
    }

    fn close(&self) -> FuseResult<()> {
        self.core.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;
    use crate::context::EngineOptions;
    use crate::task::{BruteTask, CheckTask, ScanTask};

    /// Serves canned statuses by URL; everything else is a 404.
    struct Canned {
        statuses: HashMap<String, u16>,
        seen: Mutex<Vec<String>>,
    }

    impl Canned {
        fn new(pairs: &[(&str, u16)]) -> Self {
            Self {
                statuses: pairs.iter().map(|(u, s)| ((*u).to_string(), *s)).collect(),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    impl HttpProber for Canned {
        fn fetch(
            &self,
            _method: &str,
            url: &str,
            _timeout: Duration,
            options: &HttpOptions,
        ) -> Result<HttpObservation, ExecutionError> {
            self.seen.lock().unwrap().push(url.to_string());
            if url.contains("down") {
                return Err(ExecutionError::ProbeFailed {
                    target: url.to_string(),
                    message: "connection refused".to_string(),
                });
            }
            let status = self.statuses.get(url).copied().unwrap_or(404);
            Ok(HttpObservation {
                url: url.to_string(),
                status,
                hit: options.match_status.is_empty() || options.match_status.contains(&status),
                content_length: 0,
                title: None,
                server: None,
                body: String::new(),
            })
        }
    }

    #[test]
    fn check_yields_one_result_per_url() {
        let engine = HttpEngine::new(Arc::new(Canned::new(&[("http://a", 200)])));
        let results = engine
            .execute(
                &Context::new(),
                CheckTask::new(["http://a", "http://down", "http://b"]).into(),
            )
            .unwrap()
            .collect_all();
        assert_eq!(results.len(), 3);
        assert_eq!(results.iter().filter(|r| !r.success()).count(), 1);
    }

    #[test]
    fn brute_marks_hits_by_status() {
        let prober = Arc::new(Canned::new(&[("http://h/admin", 200), ("http://h/login", 302)]));
        let mut options = EngineOptions::default();
        options.http.match_status = vec![200];
        let ctx = Context::new().with_threads(1).with_options(options);

        let engine = HttpEngine::new(prober.clone());
        let results = engine
            .execute(&ctx, BruteTask::new("http://h/", ["admin", "login", "x"]).into())
            .unwrap()
            .collect_all();

        let hits: Vec<&str> = results
            .iter()
            .filter_map(|r| r.as_http())
            .filter(|h| h.hit)
            .map(|h| h.url.as_str())
            .collect();
        assert_eq!(hits, vec!["http://h/admin"]);
        assert!(results.iter().all(ItemResult::success));
        assert_eq!(
            *prober.seen.lock().unwrap(),
            vec!["http://h/admin", "http://h/login", "http://h/x"]
        );
    }

    #[test]
    fn rejects_scan_tasks_and_closed_use() {
        let engine = HttpEngine::new(Arc::new(Canned::new(&[])));
        assert!(engine
            .execute(&Context::new(), ScanTask::new("10.0.0.1", "80").into())
            .unwrap_err()
            .is_validation());
        engine.close().unwrap();
        assert!(engine
            .execute(&Context::new(), CheckTask::new(["http://a"]).into())
            .unwrap_err()
            .is_execution());
    }

    #[test]
    fn title_extraction() {
        assert_eq!(
            extract_title("<html><TITLE lang=en>\n Admin   Panel </TITLE>").as_deref(),
            Some("Admin Panel")
        );
        assert!(extract_title("<html></html>").is_none());
    }
}
