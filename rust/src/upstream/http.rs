use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use url::Url;

use super::{FaxApi, SendFaxRequest, UpstreamError, UpstreamJob};

const API_KEY_HEADER: &str = "X-API-Key";

#[derive(Debug, Clone)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub connect_timeout: Duration,
    pub create_timeout: Duration,
    pub status_timeout: Duration,
}

impl UpstreamConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key,
            connect_timeout: Duration::from_secs(10),
            create_timeout: Duration::from_secs(30),
            status_timeout: Duration::from_secs(10),
        }
    }
}

/// `FaxApi` over the fax service's REST interface.
#[derive(Debug, Clone)]
pub struct HttpFaxClient {
    http: reqwest::Client,
    base_url: Url,
    config: UpstreamConfig,
}

impl HttpFaxClient {
    pub fn new(config: UpstreamConfig) -> Result<Self, String> {
        let base_url = Url::parse(config.base_url.trim_end_matches('/'))
            .map_err(|err| format!("Invalid fax API URL '{}': {err}", config.base_url))?;
        if base_url.cannot_be_a_base() {
            return Err(format!("Invalid fax API URL '{}'", config.base_url));
        }
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|err| format!("Failed to build HTTP client: {err}"))?;
        Ok(Self {
            http,
            base_url,
            config,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, UpstreamError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| UpstreamError::Request("fax API URL cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.config.api_key.as_deref() {
            Some(key) if !key.is_empty() => request.header(API_KEY_HEADER, key),
            _ => request,
        }
    }

    async fn create_job(&self, request: SendFaxRequest) -> Result<UpstreamJob, UpstreamError> {
        let url = self.endpoint(&["fax"])?;
        let byte_len = request.content.len();
        let file = Part::bytes(request.content)
            .file_name(request.file_name)
            .mime_str(request.file_type.mime())
            .map_err(|err| UpstreamError::Request(err.to_string()))?;
        let form = Form::new().text("to", request.to).part("file", file);

        tracing::debug!(
            url = %url,
            bytes = byte_len,
            file_type = request.file_type.as_str(),
            "posting fax to upstream"
        );
        let response = self
            .authorize(self.http.post(url))
            .timeout(self.config.create_timeout)
            .multipart(form)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status.is_success() {
            return parse_job(response).await;
        }
        let message = error_detail(response).await;
        tracing::warn!(status = status.as_u16(), "fax service rejected send request");
        Err(map_create_status(status, message))
    }

    async fn fetch_job(&self, job_id: &str) -> Result<UpstreamJob, UpstreamError> {
        let url = self.endpoint(&["fax", job_id])?;
        let response = self
            .authorize(self.http.get(url))
            .timeout(self.config.status_timeout)
            .send()
            .await
            .map_err(network_error)?;

        let status = response.status();
        if status.is_success() {
            return parse_job(response).await;
        }
        let message = error_detail(response).await;
        tracing::debug!(status = status.as_u16(), job_id, "fax status lookup failed");
        Err(map_status_lookup(status, message))
    }
}

impl FaxApi for HttpFaxClient {
    fn create(&self, request: SendFaxRequest) -> BoxFuture<'_, Result<UpstreamJob, UpstreamError>> {
        Box::pin(self.create_job(request))
    }

    fn get_status<'a>(
        &'a self,
        job_id: &'a str,
    ) -> BoxFuture<'a, Result<UpstreamJob, UpstreamError>> {
        Box::pin(self.fetch_job(job_id))
    }
}

fn network_error(err: reqwest::Error) -> UpstreamError {
    if err.is_timeout() {
        UpstreamError::Unreachable("request to fax service timed out".into())
    } else if err.is_connect() {
        UpstreamError::Unreachable("could not connect to fax service".into())
    } else {
        UpstreamError::Unreachable(format!("fax service request failed: {err}"))
    }
}

async fn parse_job(response: reqwest::Response) -> Result<UpstreamJob, UpstreamError> {
    let status = response.status().as_u16();
    let body = response.bytes().await.map_err(network_error)?;
    serde_json::from_slice::<UpstreamJob>(&body).map_err(|err| {
        tracing::warn!("fax service returned an unreadable job: {err}");
        UpstreamError::Status {
            status,
            message: "invalid response body".into(),
        }
    })
}

/// The service's `detail` field, or the reason phrase. Raw bodies are never
/// forwarded to clients.
async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    let fallback = status
        .canonical_reason()
        .unwrap_or("request failed")
        .to_string();
    let Ok(body) = response.bytes().await else {
        return fallback;
    };
    serde_json::from_slice::<serde_json::Value>(&body)
        .ok()
        .and_then(|json| {
            json.get("detail")
                .and_then(|detail| detail.as_str())
                .map(str::to_owned)
        })
        .unwrap_or(fallback)
}

fn map_create_status(status: StatusCode, message: String) -> UpstreamError {
    let code = status.as_u16();
    match status {
        StatusCode::UNAUTHORIZED => UpstreamError::Auth { status: code },
        StatusCode::PAYLOAD_TOO_LARGE => UpstreamError::PayloadTooLarge {
            status: code,
            message,
        },
        StatusCode::UNSUPPORTED_MEDIA_TYPE => UpstreamError::UnsupportedType {
            status: code,
            message,
        },
        _ => UpstreamError::Status {
            status: code,
            message,
        },
    }
}

fn map_status_lookup(status: StatusCode, message: String) -> UpstreamError {
    let code = status.as_u16();
    match status {
        StatusCode::NOT_FOUND => UpstreamError::NotFound {
            status: code,
            message,
        },
        StatusCode::UNAUTHORIZED => UpstreamError::Auth { status: code },
        _ => UpstreamError::Status {
            status: code,
            message,
        },
    }
}
