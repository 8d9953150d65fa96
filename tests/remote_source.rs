use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;

use scanfuse::error::TransportError;
use scanfuse::filter::FilterPredicate;
use scanfuse::source::{ExportQuery, HttpReply, HttpRequest, HttpTransport};
use scanfuse::{
    ConfigError, DataSource, DefinitionStore, Filter, FuseError, RemoteConfig, RemoteSource,
    Selection,
};

/// Replays canned replies in order and records every request.
#[derive(Default)]
struct Scripted {
    replies: Mutex<VecDeque<Result<HttpReply, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl Scripted {
    fn new(replies: Vec<Result<HttpReply, TransportError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn request(&self, n: usize) -> HttpRequest {
        self.requests.lock().unwrap()[n].clone()
    }
}

impl HttpTransport for Scripted {
    fn get(&self, request: &HttpRequest) -> Result<HttpReply, TransportError> {
        self.requests.lock().unwrap().push(request.clone());
        self.replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(HttpReply::new(500, "script exhausted")))
    }
}

fn ok_page(items: serde_json::Value, total: u64) -> Result<HttpReply, TransportError> {
    let body = json!({"code": 0, "message": "ok", "data": {"items": items, "total": total}});
    Ok(HttpReply::new(200, body.to_string()))
}

fn config() -> RemoteConfig {
    RemoteConfig::new("https://defs.example.test/", Some("k-123".to_string()))
        .with_retry(3, Duration::from_millis(1))
}

fn source(transport: &Arc<Scripted>) -> RemoteSource {
    RemoteSource::with_transport(config(), transport.clone()).unwrap()
}

fn param<'a>(request: &'a HttpRequest, key: &str) -> Vec<&'a str> {
    request
        .query
        .iter()
        .filter(|(k, _)| k == key)
        .map(|(_, v)| v.as_str())
        .collect()
}

#[test]
fn forbidden_is_not_retried() {
    let transport = Scripted::new(vec![Ok(HttpReply::new(403, "invalid api key"))]);
    let err = source(&transport)
        .fingerprints(&ExportQuery::default())
        .unwrap_err();

    assert!(err.is_auth());
    assert!(matches!(
        err,
        FuseError::Auth { status: 403, ref message } if message == "invalid api key"
    ));
    assert_eq!(transport.calls(), 1);
}

#[test]
fn transient_failure_then_success() {
    let transport = Scripted::new(vec![
        Ok(HttpReply::new(503, "busy")),
        ok_page(json!([{"id": "fp-1", "name": "nginx", "tags": ["web"]}]), 1),
    ]);
    let fps = source(&transport)
        .fingerprints(&ExportQuery::default())
        .unwrap();

    assert_eq!(fps.len(), 1);
    assert_eq!(fps[0].name, "nginx");
    assert_eq!(transport.calls(), 2);
}

#[test]
fn connection_errors_exhaust_attempts() {
    let refused = || {
        Err(TransportError::ConnectionFailed {
            message: "refused".to_string(),
        })
    };
    let transport = Scripted::new(vec![refused(), refused(), refused(), refused()]);
    let err = source(&transport).probes(&ExportQuery::default()).unwrap_err();

    assert!(err.is_transport());
    assert_eq!(transport.calls(), 3);
}

#[test]
fn application_error_code_fails_without_retry() {
    let body = json!({"code": 1003, "message": "quota exceeded", "data": null});
    let transport = Scripted::new(vec![Ok(HttpReply::new(200, body.to_string()))]);
    let err = source(&transport).probes(&ExportQuery::default()).unwrap_err();

    assert!(matches!(
        err,
        FuseError::Transport(TransportError::Application { code: 1003, .. })
    ));
    assert_eq!(transport.calls(), 1);
}

#[test]
fn requests_carry_key_and_endpoint() {
    let transport = Scripted::new(vec![ok_page(json!([]), 0)]);
    source(&transport).probes(&ExportQuery::default()).unwrap();

    let request = transport.request(0);
    assert_eq!(request.url, "https://defs.example.test/api/v1/probes/export");
    assert_eq!(request.header("x-api-key"), Some("k-123"));
    assert_eq!(param(&request, "page"), vec!["1"]);
    assert_eq!(param(&request, "page_size"), vec!["500"]);
}

#[test]
fn limit_becomes_a_single_page() {
    let transport = Scripted::new(vec![ok_page(
        json!([{"id": "t1", "name": "one"}, {"id": "t2", "name": "two"}]),
        40,
    )]);
    let predicate = FilterPredicate::new()
        .with_tags(["cms", "iot"])
        .with_status("published")
        .with_limit(2);
    let probes = source(&transport)
        .probes(&ExportQuery::from_predicate(&predicate))
        .unwrap();

    assert_eq!(probes.len(), 2);
    assert_eq!(transport.calls(), 1);
    let request = transport.request(0);
    assert_eq!(param(&request, "tag"), vec!["cms", "iot"]);
    assert_eq!(param(&request, "status"), vec!["published"]);
    assert_eq!(param(&request, "page"), vec!["1"]);
    assert_eq!(param(&request, "page_size"), vec!["2"]);
}

#[test]
fn full_export_walks_pages_until_total() {
    let transport = Scripted::new(vec![
        ok_page(json!([{"id": "a", "name": "a"}, {"id": "b", "name": "b"}]), 3),
        ok_page(json!([{"id": "c", "name": "c"}]), 3),
    ]);
    let mut config = config();
    config.page_size = 2;
    let remote = RemoteSource::with_transport(config, transport.clone()).unwrap();

    let fps = remote.fingerprints(&ExportQuery::default()).unwrap();
    let names: Vec<&str> = fps.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b", "c"]);
    assert_eq!(transport.calls(), 2);
    assert_eq!(param(&transport.request(1), "page"), vec!["2"]);
}

#[test]
fn missing_key_is_a_config_error() {
    let transport = Scripted::new(Vec::new());
    let err = RemoteSource::with_transport(
        RemoteConfig::new("https://defs.example.test", Some("  ".to_string())),
        transport.clone(),
    )
    .unwrap_err();

    assert!(matches!(err, FuseError::Config(ConfigError::MissingApiKey { .. })));
    assert_eq!(transport.calls(), 0);
}

#[test]
fn store_reload_filters_remote_records() {
    let transport = Scripted::new(vec![
        ok_page(
            json!([
                {"id": "fp-1", "name": "wordpress", "tags": ["cms"]},
                {"id": "fp-2", "name": "hikvision", "tags": ["iot"]}
            ]),
            2,
        ),
        ok_page(
            json!([{"id": "wp-1", "name": "xmlrpc", "fingerprints": ["wordpress"]}]),
            1,
        ),
    ]);
    let store = DefinitionStore::new();
    let selection = Selection {
        fingerprints: Filter::new(FilterPredicate::new().with_tags(["cms"])),
        probes: Filter::all(),
    };

    let stats = store.reload(&source(&transport), &selection).unwrap();
    assert_eq!(stats.fingerprints_fetched, 2);
    assert_eq!(stats.fingerprints, 1);
    assert_eq!(stats.probes, 1);
    assert!(store.index().has_associated_child("wordpress"));
    assert_eq!(param(&transport.request(0), "tag"), vec!["cms"]);
}
