#![allow(dead_code)]

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{Request, Response, StatusCode};
use report_collector::config::Config;
use report_collector::state::AppState;
use report_collector::web::create_router;
use serde_json::Value;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tower::ServiceExt;

/// Peer address reported for every request unless proxy headers say otherwise.
pub const PEER: &str = "198.51.100.23:40112";

/// A router over a throwaway report log. Keep the value alive for the
/// duration of the test; dropping it removes the log directory.
pub struct TestApp {
    pub router: Router,
    pub log_path: PathBuf,
    _dir: TempDir,
}

pub fn test_config(dir: &Path) -> Config {
    let schema_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("schema");
    Config {
        report_log_path: dir.join("logs").join("app.json"),
        csp_schema_path: schema_dir.join("content-security-policy-report-2.json"),
        hpkp_schema_path: schema_dir.join("http-public-key-pinning-report.json"),
        rate_limit_enabled: false,
        ..Config::default()
    }
}

pub fn spawn_app() -> TestApp {
    spawn_app_with(|_| {})
}

/// Build an app after letting the caller adjust the default test config.
pub fn spawn_app_with(configure: impl FnOnce(&mut Config)) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config(dir.path());
    configure(&mut config);

    let state = AppState::from_config(&config).unwrap();
    let peer: SocketAddr = PEER.parse().unwrap();
    let router = create_router(state, &config).layer(MockConnectInfo(peer));

    TestApp {
        router,
        log_path: config.report_log_path.clone(),
        _dir: dir,
    }
}

impl TestApp {
    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(request).await.unwrap()
    }

    pub async fn post_json(&self, uri: &str, body: &Value) -> Response<Body> {
        self.post_raw(uri, "application/csp-report", body.to_string())
            .await
    }

    pub async fn post_raw(
        &self,
        uri: &str,
        content_type: &str,
        body: impl Into<Body>,
    ) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", content_type)
            .header("user-agent", "Mozilla/5.0 (test)")
            .body(body.into())
            .unwrap();
        self.send(request).await
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
        self.send(request).await
    }

    /// Every line currently in the report log, parsed as JSON.
    pub fn log_lines(&self) -> Vec<Value> {
        match std::fs::read_to_string(&self.log_path) {
            Ok(contents) => contents
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => panic!("failed to read report log: {e}"),
        }
    }
}

pub async fn json_body(response: Response<Body>) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

pub async fn expect_status(response: Response<Body>, status: StatusCode) -> Value {
    assert_eq!(response.status(), status);
    json_body(response).await
}

/// A CSP report that passes the schema and no suppression rule.
pub fn csp_report() -> Value {
    serde_json::json!({
        "csp-report": {
            "document-uri": "https://example.com/page",
            "referrer": "",
            "violated-directive": "script-src 'self'",
            "effective-directive": "script-src",
            "original-policy": "default-src 'self'; report-uri /csp",
            "disposition": "enforce",
            "blocked-uri": "https://evil.example.net/x.js",
            "line-number": 12,
            "source-file": "https://example.com/page",
            "status-code": 200
        }
    })
}

pub fn hpkp_report() -> Value {
    serde_json::json!({
        "date-time": "2026-10-19T12:00:00Z",
        "hostname": "example.com",
        "port": 443,
        "effective-expiration-date": "2026-11-19T12:00:00Z",
        "include-subdomains": false,
        "noted-hostname": "example.com",
        "served-certificate-chain": ["-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----"],
        "validated-certificate-chain": ["-----BEGIN CERTIFICATE-----\nMIIB\n-----END CERTIFICATE-----"],
        "known-pins": ["pin-sha256=\"d6qzRu9zOECb90Uez27xWltNsj0e1Md7GkYYkVoZWmM=\""]
    })
}
