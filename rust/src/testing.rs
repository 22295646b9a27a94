//! In-process fixtures shared by the transport unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::executor::ToolExecutor;
use crate::protocol::McpHandler;
use crate::session::SessionManager;
use crate::tools::ToolRegistry;
use crate::transport::Gateway;
use crate::upstream::{FaxApi, JobStatus, SendFaxRequest, UpstreamError, UpstreamJob};

/// Fake fax service with call counters and an optional per-call delay.
#[derive(Default)]
pub struct StubFaxApi {
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub completed: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl StubFaxApi {
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Default::default()
        }
    }

    async fn run(&self, job: UpstreamJob) -> Result<UpstreamJob, UpstreamError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);
        if job.id == "missing" {
            return Err(UpstreamError::NotFound {
                status: 404,
                message: "Job not found".into(),
            });
        }
        Ok(job)
    }
}

fn job(id: &str, to: &str, status: JobStatus) -> UpstreamJob {
    UpstreamJob {
        id: id.to_string(),
        to: to.to_string(),
        status,
        error: None,
        pages: None,
        created_at: Some("2024-01-01T00:00:00Z".into()),
        updated_at: Some("2024-01-01T00:00:00Z".into()),
    }
}

impl FaxApi for StubFaxApi {
    fn create(&self, request: SendFaxRequest) -> BoxFuture<'_, Result<UpstreamJob, UpstreamError>> {
        Box::pin(async move { self.run(job("abc123", &request.to, JobStatus::Queued)).await })
    }

    fn get_status<'a>(
        &'a self,
        job_id: &'a str,
    ) -> BoxFuture<'a, Result<UpstreamJob, UpstreamError>> {
        Box::pin(async move { self.run(job(job_id, "+15551234567", JobStatus::InProgress)).await })
    }
}

pub fn gateway(upstream: Arc<StubFaxApi>, idle_timeout: Duration) -> Gateway {
    let registry = Arc::new(ToolRegistry::builtin().expect("builtin registry"));
    let executor = Arc::new(ToolExecutor::new(registry, upstream));
    Gateway::new(McpHandler::new(executor), SessionManager::new(idle_timeout))
}

/// Serve `router` on an ephemeral local port; returns its base URL.
pub async fn spawn_router(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test server");
    let addr = listener.local_addr().expect("test server addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    format!("http://{addr}")
}

pub const TEST_ISSUER: &str = "https://issuer.test";
pub const TEST_AUDIENCE: &str = "faxbot-mcp";
const SIGNING_KEY: &[u8] = include_bytes!("../tests/fixtures/jwt_signing_key.pem");
const JWKS: &str = include_str!("../tests/fixtures/jwks.json");

/// Serve the fixture key set; returns its URL.
pub async fn spawn_jwks() -> String {
    let jwks: serde_json::Value = serde_json::from_str(JWKS).expect("fixture jwks");
    let router = axum::Router::new().route(
        "/.well-known/jwks.json",
        axum::routing::get(move || {
            let jwks = jwks.clone();
            async move { axum::Json(jwks) }
        }),
    );
    format!("{}/.well-known/jwks.json", spawn_router(router).await)
}

/// RS256 token signed with the fixture key. `ttl_secs` may be negative.
pub fn sign_token(subject: &str, ttl_secs: i64) -> String {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("clock")
        .as_secs() as i64;
    let claims = serde_json::json!({
        "sub": subject,
        "iss": TEST_ISSUER,
        "aud": TEST_AUDIENCE,
        "iat": now,
        "exp": now + ttl_secs,
    });
    let mut header = jsonwebtoken::Header::new(jsonwebtoken::Algorithm::RS256);
    header.kid = Some("test-key-1".into());
    let key = jsonwebtoken::EncodingKey::from_rsa_pem(SIGNING_KEY).expect("fixture key");
    jsonwebtoken::encode(&header, &claims, &key).expect("sign token")
}
