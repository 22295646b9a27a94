mod http;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};

pub use http::{HttpFaxClient, UpstreamConfig};

/// Document kinds the fax service accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileType {
    Pdf,
    Txt,
}

impl FileType {
    const ALL: [FileType; 2] = [FileType::Pdf, FileType::Txt];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pdf => "pdf",
            Self::Txt => "txt",
        }
    }

    pub fn mime(self) -> &'static str {
        match self {
            Self::Pdf => "application/pdf",
            Self::Txt => "text/plain",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(raw))
    }
}

/// Job status as reported by the fax service.
///
/// The casing is reproduced verbatim from the service (`SUCCESS` is
/// uppercase, everything else lowercase); clients already match on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    #[serde(rename = "queued")]
    Queued,
    #[serde(rename = "in_progress")]
    InProgress,
    #[serde(rename = "SUCCESS")]
    Success,
    #[serde(rename = "failed")]
    Failed,
    #[serde(rename = "disabled")]
    Disabled,
}

impl JobStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::InProgress => "in_progress",
            Self::Success => "SUCCESS",
            Self::Failed => "failed",
            Self::Disabled => "disabled",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamJob {
    pub id: String,
    #[serde(default)]
    pub to: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pages: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// A validated outbound fax, ready to post.
#[derive(Clone, PartialEq, Eq)]
pub struct SendFaxRequest {
    pub to: String,
    pub file_name: String,
    pub file_type: FileType,
    pub content: Vec<u8>,
}

impl std::fmt::Debug for SendFaxRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SendFaxRequest")
            .field("to", &self.to)
            .field("file_name", &self.file_name)
            .field("file_type", &self.file_type)
            .field("content_bytes", &self.content.len())
            .finish()
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum UpstreamError {
    #[error("{0}")]
    Unreachable(String),

    #[error("authentication with the fax service failed (HTTP {status})")]
    Auth { status: u16 },

    #[error("document too large (HTTP {status}): {message}")]
    PayloadTooLarge { status: u16, message: String },

    #[error("unsupported document type (HTTP {status}): {message}")]
    UnsupportedType { status: u16, message: String },

    #[error("job not found (HTTP {status}): {message}")]
    NotFound { status: u16, message: String },

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("failed to build fax service request: {0}")]
    Request(String),
}

/// The two calls the gateway makes against the fax service.
pub trait FaxApi: Send + Sync {
    fn create(&self, request: SendFaxRequest) -> BoxFuture<'_, Result<UpstreamJob, UpstreamError>>;

    fn get_status<'a>(
        &'a self,
        job_id: &'a str,
    ) -> BoxFuture<'a, Result<UpstreamJob, UpstreamError>>;
}
