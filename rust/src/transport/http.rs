use std::future::Future;
use std::net::SocketAddr;

use axum::extract::DefaultBodyLimit;
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::config::CorsConfig;
use crate::protocol::{SERVER_NAME, SERVER_VERSION};

pub const SESSION_HEADER: &str = "mcp-session-id";
pub const HEALTH_PATH: &str = "/health";

/// Listener and edge settings common to the HTTP transports.
#[derive(Debug, Clone)]
pub struct HttpOptions {
    pub host: String,
    pub port: u16,
    pub max_body_bytes: usize,
    pub cors: CorsConfig,
    pub health_endpoints: Vec<String>,
}

pub fn json_error(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

pub fn unauthorized() -> Response {
    json_error(StatusCode::UNAUTHORIZED, "Unauthorized")
}

/// A JSON-RPC body with a transport-level status code.
pub fn jsonrpc_response(status: StatusCode, body: Value) -> Response {
    (status, Json(body)).into_response()
}

/// Add health routes, body ceiling and CORS to a transport router.
pub fn finish_router(router: Router, transport: &'static str, options: &HttpOptions) -> Router {
    let mut paths = vec![HEALTH_PATH.to_string()];
    for path in &options.health_endpoints {
        if !paths.contains(path) {
            paths.push(path.clone());
        }
    }
    let mut router = router;
    for path in paths {
        router = router.route(
            &path,
            get(move || async move {
                Json(json!({
                    "status": "ok",
                    "transport": transport,
                    "server": SERVER_NAME,
                    "version": SERVER_VERSION,
                }))
            }),
        );
    }

    let router = router.layer(DefaultBodyLimit::max(options.max_body_bytes));
    match cors_layer(&options.cors) {
        Some(cors) => router.layer(cors),
        None => router,
    }
}

fn cors_layer(cors: &CorsConfig) -> Option<CorsLayer> {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(SESSION_HEADER)]);
    match cors {
        CorsConfig::Disabled => None,
        CorsConfig::AllowAll => Some(base.allow_origin(Any)),
        CorsConfig::AllowList { raw } => {
            let origins = raw
                .iter()
                .filter_map(|origin| match HeaderValue::from_str(origin) {
                    Ok(value) => Some(value),
                    Err(_) => {
                        tracing::warn!("Ignoring invalid CORS origin: {origin}");
                        None
                    }
                })
                .collect::<Vec<_>>();
            Some(base.allow_origin(AllowOrigin::list(origins)))
        }
    }
}

/// Bind and serve until `shutdown` resolves.
pub async fn serve(
    router: Router,
    options: &HttpOptions,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), String> {
    let addr = format!("{}:{}", options.host, options.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|err| format!("Failed to bind {addr}: {err}"))?;
    let local: SocketAddr = listener
        .local_addr()
        .map_err(|err| format!("Failed to read listener address: {err}"))?;
    tracing::info!("Listening on http://{local}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|err| format!("HTTP server error: {err}"))
}
