//! MCP gateway exposing the Faxbot `send_fax` and `get_fax_status` tools
//! over line-delimited stdio, Streamable HTTP and bearer-gated SSE.

pub mod auth;
pub mod config;
pub mod error;
pub mod executor;
pub mod protocol;
pub mod session;
pub mod support;
pub mod tools;
pub mod transport;
pub mod upstream;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use crate::auth::{AuthConfig, BearerVerifier};
use crate::config::{Config, Transport};
use crate::executor::ToolExecutor;
use crate::protocol::McpHandler;
use crate::session::SessionManager;
use crate::tools::ToolRegistry;
use crate::transport::http::HttpOptions;
use crate::transport::{line, sse, streamable_http, Gateway};
use crate::upstream::{HttpFaxClient, UpstreamConfig};

/// Wire the shared core together and serve `config.transport` until
/// shutdown or end of input.
pub async fn run(config: Config) -> Result<(), String> {
    let upstream = HttpFaxClient::new(UpstreamConfig::new(
        config.fax_api_url.clone(),
        config.api_key.clone(),
    ))?;
    let registry = ToolRegistry::builtin()
        .map_err(|err| format!("Invalid tool schema pattern: {err}"))?;
    let executor = ToolExecutor::new(Arc::new(registry), Arc::new(upstream));
    let gateway = Gateway::new(
        McpHandler::new(Arc::new(executor)),
        SessionManager::new(config.session_timeout),
    );

    let options = HttpOptions {
        host: config.host.clone(),
        port: config.port,
        max_body_bytes: config.max_body_bytes,
        cors: config.cors.clone(),
        health_endpoints: config.health_endpoints.clone(),
    };

    match config.transport {
        Transport::Stdio => line::run_stdio(gateway, config.max_body_bytes).await,
        Transport::StreamableHttp => {
            streamable_http::run(gateway, options, config.streamable_http_path).await
        }
        Transport::Sse => {
            let oauth = config
                .oauth
                .ok_or_else(|| "the sse transport requires OAuth settings".to_string())?;
            let mut auth = AuthConfig::new(oauth.issuer, oauth.audience);
            auth.jwks_url = oauth.jwks_url;
            let verifier = BearerVerifier::new(auth)
                .map_err(|err| format!("Failed to build key set client: {err}"))?;
            sse::run(
                gateway,
                Arc::new(verifier),
                options,
                config.sse_path,
                config.message_path,
            )
            .await
        }
    }
}
