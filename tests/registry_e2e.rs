use std::sync::Arc;
use std::time::Duration;

use scanfuse::engine::{FingerprintEngine, HttpProber, KeywordMatcher};
use scanfuse::error::ExecutionError;
use scanfuse::result::HttpObservation;
use scanfuse::{
    CheckTask, Client, ConfigError, Context, DefinitionStore, Engine, EngineConfig,
    EngineRegistry, Fingerprint, FuseError, FuseResult, HttpOptions, MatchTask, ProbeDefinition,
    ProbeExecuteTask, ProbeSelection,
};

struct Echo;

impl HttpProber for Echo {
    fn fetch(
        &self,
        method: &str,
        url: &str,
        _timeout: Duration,
        _options: &HttpOptions,
    ) -> Result<HttpObservation, ExecutionError> {
        Ok(HttpObservation {
            url: url.to_string(),
            status: 200,
            hit: true,
            content_length: 0,
            title: Some(method.to_string()),
            server: None,
            body: format!("{method} {url} ok"),
        })
    }
}

fn store() -> Arc<DefinitionStore> {
    Arc::new(DefinitionStore::from_records(
        vec![Fingerprint::new("nginx").with_keywords(["nginx"])],
        vec![ProbeDefinition::new("t1")
            .with_fingerprints(["nginx"])
            .with_path("/status")
            .with_matchers(["/status ok"])],
    ))
}

fn client() -> Client {
    let config = EngineConfig::new()
        .with_store(store())
        .with_http_prober(Arc::new(Echo));
    Client::new(Arc::new(EngineRegistry::with_builtin()), config)
}

#[test]
fn duplicate_registration_fails_at_startup() {
    let mut registry = EngineRegistry::new();
    let factory = |config: &EngineConfig| -> FuseResult<Arc<dyn Engine>> {
        Ok(Arc::new(FingerprintEngine::new(Arc::new(KeywordMatcher), config.store())))
    };
    registry.register("x", factory).unwrap();
    assert_eq!(
        registry.register("x", factory),
        Err(ConfigError::DuplicateEngine {
            name: "x".to_string()
        })
    );

    let mut builtin = EngineRegistry::with_builtin();
    assert!(builtin.register("portscan", factory).is_err());
}

#[test]
fn unknown_engine_enumerates_available() {
    let client = client();
    let err = client
        .execute("nmap", &Context::new(), CheckTask::new(["http://a"]).into())
        .unwrap_err();
    match err {
        FuseError::Config(ConfigError::UnknownEngine { name, available }) => {
            assert_eq!(name, "nmap");
            assert_eq!(available, vec!["fingerprint", "http", "portscan", "probe"]);
        }
        other => panic!("expected unknown engine error, got {other}"),
    }
}

#[test]
fn client_routes_tasks_to_builtin_engines() {
    let client = client();
    let ctx = Context::new().with_threads(2);

    let hits = client
        .execute("fingerprint", &ctx, MatchTask::new(b"Server: nginx".to_vec()).into())
        .unwrap()
        .collect_all();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].as_match().unwrap()[0].name, "nginx");

    let findings = client
        .execute(
            "probe",
            &ctx,
            ProbeExecuteTask::new("10.0.0.9", ProbeSelection::Fingerprints(vec!["nginx".into()]))
                .into(),
        )
        .unwrap()
        .collect_all();
    assert_eq!(findings.len(), 1);
    assert!(findings[0].as_probe().unwrap().vulnerable);

    let checks = client
        .execute("http", &ctx, CheckTask::new(["http://a", "http://b"]).into())
        .unwrap()
        .collect_all();
    assert_eq!(checks.len(), 2);

    assert_eq!(client.cached(), vec!["fingerprint", "http", "probe"]);
    client.close().unwrap();
    assert!(client.cached().is_empty());
}

#[test]
fn wrong_task_kind_fails_before_any_work() {
    let client = client();
    let err = client
        .execute("fingerprint", &Context::new(), CheckTask::new(["http://a"]).into())
        .unwrap_err();
    assert!(err.is_validation());
    assert!(err.to_string().contains("does not accept check"));
}
