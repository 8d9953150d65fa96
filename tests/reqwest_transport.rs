use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::json;

use scanfuse::context::HttpOptions;
use scanfuse::engine::{HttpProber, ReqwestProber};
use scanfuse::source::ExportQuery;
use scanfuse::{DataSource, RemoteConfig, RemoteSource};

/// Request line and lowercased headers as seen by the server.
struct Seen {
    request_line: String,
    headers: Vec<(String, String)>,
}

impl Seen {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

fn gzip(bytes: &[u8]) -> Vec<u8> {
    let mut enc = GzEncoder::new(Vec::new(), Compression::default());
    enc.write_all(bytes).unwrap();
    enc.finish().unwrap()
}

/// Serves one canned response on 127.0.0.1 and returns the base URL.
fn serve_once(status: &str, headers: &[(&str, &str)], body: Vec<u8>) -> (String, JoinHandle<Seen>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());

    let mut head = format!(
        "HTTP/1.1 {status}\r\nContent-Length: {}\r\nConnection: close\r\n",
        body.len()
    );
    for (name, value) in headers {
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    let handle = thread::Builder::new()
        .name("transport-test-server".to_string())
        .spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            stream
                .set_read_timeout(Some(Duration::from_secs(5)))
                .unwrap();

            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut request_line = String::new();
            reader.read_line(&mut request_line).unwrap();
            let mut headers = Vec::new();
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).unwrap();
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((k, v)) = line.split_once(':') {
                    headers.push((k.trim().to_ascii_lowercase(), v.trim().to_string()));
                }
            }

            stream.write_all(head.as_bytes()).unwrap();
            stream.write_all(&body).unwrap();
            stream.flush().unwrap();
            Seen {
                request_line: request_line.trim_end().to_string(),
                headers,
            }
        })
        .unwrap();
    (base, handle)
}

#[test]
fn remote_source_requests_and_inflates_gzip() {
    let envelope = json!({
        "code": 0,
        "message": "ok",
        "data": {
            "items": [
                {"id": "fp-1", "name": "nginx", "tags": ["web"]},
                {"id": "fp-2", "name": "tomcat", "tags": ["web", "java"]}
            ],
            "total": 2
        }
    });
    let (base, server) = serve_once(
        "200 OK",
        &[
            ("Content-Type", "application/json"),
            ("Content-Encoding", "gzip"),
        ],
        gzip(envelope.to_string().as_bytes()),
    );

    let config = RemoteConfig::new(base, Some("k-1".to_string()))
        .with_retry(1, Duration::from_millis(1));
    let source = RemoteSource::new(config).unwrap();
    let fps = source.fingerprints(&ExportQuery::default()).unwrap();

    let names: Vec<&str> = fps.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["nginx", "tomcat"]);

    let seen = server.join().unwrap();
    assert!(seen
        .request_line
        .starts_with("GET /api/v1/fingerprints/export?"));
    assert!(seen.request_line.contains("page=1"));
    assert!(seen
        .header("accept-encoding")
        .is_some_and(|v| v.contains("gzip")));
    assert_eq!(seen.header("x-api-key"), Some("k-1"));
}

#[test]
fn prober_reads_status_title_and_server() {
    let page = b"<html><head><title>\n  Admin   Console </title></head><body>hi</body></html>";
    let (base, server) = serve_once(
        "200 OK",
        &[
            ("Content-Type", "text/html"),
            ("Content-Encoding", "gzip"),
            ("Server", "test-httpd/1.0"),
        ],
        gzip(page),
    );

    let prober = ReqwestProber::new().unwrap();
    let options = HttpOptions {
        match_status: vec![200],
        ..HttpOptions::default()
    };
    let url = format!("{base}/admin");
    let obs = prober
        .fetch("get", &url, Duration::from_secs(5), &options)
        .unwrap();

    assert_eq!(obs.url, url);
    assert_eq!(obs.status, 200);
    assert!(obs.hit);
    assert_eq!(obs.title.as_deref(), Some("Admin Console"));
    assert_eq!(obs.server.as_deref(), Some("test-httpd/1.0"));
    assert_eq!(obs.content_length, page.len());

    let seen = server.join().unwrap();
    assert_eq!(seen.request_line, "GET /admin HTTP/1.1");
    assert!(seen
        .header("user-agent")
        .is_some_and(|v| v.starts_with("scanfuse/")));
}

#[test]
fn prober_marks_unlisted_status_as_miss() {
    let (base, server) = serve_once("404 Not Found", &[], b"missing".to_vec());

    let prober = ReqwestProber::new().unwrap();
    let options = HttpOptions {
        match_status: vec![200, 301],
        ..HttpOptions::default()
    };
    let obs = prober
        .fetch("GET", &format!("{base}/nope"), Duration::from_secs(5), &options)
        .unwrap();

    assert_eq!(obs.status, 404);
    assert!(!obs.hit);
    assert!(obs.title.is_none());
    server.join().unwrap();
}
