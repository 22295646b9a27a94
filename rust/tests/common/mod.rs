#![allow(dead_code)]

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::process::{Child, Command};

pub const TEST_ISSUER: &str = "https://issuer.test";
pub const TEST_AUDIENCE: &str = "faxbot-mcp";

pub fn find_free_port() -> u16 {
    std::net::TcpListener::bind(("127.0.0.1", 0))
        .expect("failed to bind local test port")
        .local_addr()
        .expect("failed to read local address")
        .port()
}

pub async fn spawn_faxbot(args: &[&str], pipe_stdio: bool) -> Child {
    let mut cmd = Command::new(faxbot_exe_path());
    cmd.args(args)
        .env_remove("PORT")
        .env_remove("FAX_API_URL")
        .env_remove("API_KEY")
        .env_remove("MCP_TRANSPORT")
        .env_remove("FAXBOT_MCP_CONFIG")
        .env_remove("HOST")
        .env_remove("MCP_SESSION_TIMEOUT_MS")
        .env_remove("MAX_REQUEST_BYTES")
        .env_remove("OAUTH_ISSUER")
        .env_remove("OAUTH_AUDIENCE")
        .env_remove("OAUTH_JWKS_URL")
        .stdin(if pipe_stdio {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(if pipe_stdio {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stderr(Stdio::null())
        .kill_on_drop(true);

    cmd.spawn().expect("failed to spawn faxbot-mcp")
}

fn faxbot_exe_path() -> PathBuf {
    if let Ok(exe) = std::env::var("CARGO_BIN_EXE_faxbot-mcp") {
        return PathBuf::from(exe);
    }

    let current = std::env::current_exe().expect("failed to read current test binary path");
    let target_dir = current
        .parent()
        .and_then(|path| path.parent())
        .expect("failed to derive target/debug directory from test binary path");
    let fallback = target_dir.join(format!("faxbot-mcp{}", std::env::consts::EXE_SUFFIX));
    assert!(
        fallback.exists(),
        "faxbot-mcp binary not found at {}",
        fallback.display()
    );
    fallback
}

pub async fn stop_child(child: &mut Child) {
    match child.try_wait() {
        Ok(Some(_)) => {}
        Ok(None) | Err(_) => {
            let _ = child.kill().await;
            let _ = child.wait().await;
        }
    }
}

pub async fn wait_for_http_status(url: &str, expected: reqwest::StatusCode, timeout: Duration) {
    let client = reqwest::Client::new();
    let deadline = Instant::now() + timeout;
    loop {
        if let Ok(response) = client.get(url).send().await {
            if response.status() == expected {
                return;
            }
        }

        assert!(
            Instant::now() < deadline,
            "timed out waiting for {url} to return status {expected}"
        );

        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub fn initialize_request(id: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "initialize",
        "params": {
            "protocolVersion": "2024-11-05",
            "capabilities": {},
            "clientInfo": {
                "name": "integration-test",
                "version": "0.1.0"
            }
        }
    })
}

pub fn send_fax_request(id: i64, to: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "tools/call",
        "params": {
            "name": "send_fax",
            "arguments": {
                "to": to,
                "fileContent": "JVBERi0xLjQK",
                "fileName": "document.pdf"
            }
        }
    })
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock server");
    let addr = listener.local_addr().expect("mock server addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

/// In-process stand-in for the fax service.
#[derive(Clone, Default)]
pub struct MockFaxService {
    pub creates: Arc<AtomicUsize>,
    pub lookups: Arc<AtomicUsize>,
}

impl MockFaxService {
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    /// Serve the mock; returns its base URL.
    pub async fn spawn(&self) -> String {
        let router = Router::new()
            .route("/fax", post(create_fax))
            .route("/fax/{id}", get(fax_status))
            .with_state(self.clone());
        serve(router).await
    }
}

async fn create_fax(State(mock): State<MockFaxService>) -> (StatusCode, Json<Value>) {
    mock.creates.fetch_add(1, Ordering::SeqCst);
    (
        StatusCode::OK,
        Json(json!({
            "id": "abc123",
            "to": "+15551234567",
            "status": "queued",
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:00:00Z"
        })),
    )
}

async fn fax_status(
    State(mock): State<MockFaxService>,
    Path(id): Path<String>,
) -> (StatusCode, Json<Value>) {
    mock.lookups.fetch_add(1, Ordering::SeqCst);
    if id != "abc123" {
        return (StatusCode::NOT_FOUND, Json(json!({"detail": "Job not found"})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "id": "abc123",
            "to": "+15551234567",
            "status": "SUCCESS",
            "pages": 2,
            "created_at": "2024-01-01T00:00:00Z",
            "updated_at": "2024-01-01T00:05:00Z"
        })),
    )
}

/// Serve the fixture key set; returns the key set URL.
pub async fn spawn_jwks() -> String {
    let jwks: Value = serde_json::from_str(include_str!("../fixtures/jwks.json"))
        .expect("fixture jwks");
    let router = Router::new().route(
        "/.well-known/jwks.json",
        get(move || {
            let jwks = jwks.clone();
            async move { Json(jwks) }
        }),
    );
    format!("{}/.well-known/jwks.json", serve(router).await)
}

/// RS256 token from the fixture key. `ttl_secs` may be negative.
pub fn sign_token(subject: &str, ttl_secs: i64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_secs() as i64;
    let claims = json!({
        "sub": subject,
        "iss": TEST_ISSUER,
        "aud": TEST_AUDIENCE,
        "iat": now,
        "exp": now + ttl_secs,
    });
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some("test-key-1".into());
    let key = jsonwebtoken::EncodingKey::from_rsa_pem(include_bytes!(
        "../fixtures/jwt_signing_key.pem"
    ))
    .expect("fixture key");
    jsonwebtoken::encode(&header, &claims, &key).expect("sign token")
}
