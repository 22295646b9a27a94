use serde_json::{json, Value};

use crate::upstream::UpstreamError;

/// Stable, machine-readable error classes shared by every transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidParams,
    MethodNotFound,
    Unauthorized,
    SessionInvalid,
    UpstreamUnavailable,
    UpstreamError,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::MethodNotFound => "method_not_found",
            Self::Unauthorized => "unauthorized",
            Self::SessionInvalid => "session_invalid",
            Self::UpstreamUnavailable => "upstream_unavailable",
            Self::UpstreamError => "upstream_error",
            Self::InternalError => "internal_error",
        }
    }

    pub fn jsonrpc_code(self) -> i64 {
        match self {
            Self::InvalidParams => INVALID_PARAMS,
            Self::MethodNotFound => METHOD_NOT_FOUND,
            Self::Unauthorized => -32001,
            Self::SessionInvalid => -32000,
            Self::UpstreamUnavailable => -32010,
            Self::UpstreamError => -32011,
            Self::InternalError => INTERNAL_ERROR,
        }
    }
}

pub const PARSE_ERROR: i64 = -32700;
pub const INVALID_REQUEST: i64 = -32600;
pub const METHOD_NOT_FOUND: i64 = -32601;
pub const INVALID_PARAMS: i64 = -32602;
pub const INTERNAL_ERROR: i64 = -32603;

/// Which failure the fax service reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailure {
    Auth,
    PayloadTooLarge,
    UnsupportedType,
    NotFound,
    Generic,
}

impl UpstreamFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::PayloadTooLarge => "payload_too_large",
            Self::UnsupportedType => "unsupported_type",
            Self::NotFound => "not_found",
            Self::Generic => "generic",
        }
    }
}

/// Outcome of a failed tool invocation.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("{0}")]
    InvalidParams(String),

    #[error("Unknown tool: {0}")]
    MethodNotFound(String),

    #[error("Fax service unreachable: {0}")]
    UpstreamUnavailable(String),

    #[error("Fax service error: {message}")]
    Upstream {
        failure: UpstreamFailure,
        status: Option<u16>,
        message: String,
    },

    /// The detail is for operator logs only; clients see a generic message.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ToolError {
    pub fn invalid_params(message: impl Into<String>) -> Self {
        Self::InvalidParams(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidParams(_) => ErrorKind::InvalidParams,
            Self::MethodNotFound(_) => ErrorKind::MethodNotFound,
            Self::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            Self::Upstream { .. } => ErrorKind::UpstreamError,
            Self::Internal(_) => ErrorKind::InternalError,
        }
    }

    /// JSON-RPC `error` member for this failure.
    pub fn to_jsonrpc_error(&self) -> Value {
        let kind = self.kind();
        match self {
            Self::Upstream {
                failure, status, ..
            } => json!({
                "code": kind.jsonrpc_code(),
                "message": self.to_string(),
                "data": {
                    "kind": kind.as_str(),
                    "upstream": failure.as_str(),
                    "status": status,
                }
            }),
            Self::Internal(_) => json!({
                "code": kind.jsonrpc_code(),
                "message": "Internal error",
                "data": { "kind": kind.as_str() }
            }),
            _ => json!({
                "code": kind.jsonrpc_code(),
                "message": self.to_string(),
                "data": { "kind": kind.as_str() }
            }),
        }
    }
}

impl From<UpstreamError> for ToolError {
    fn from(err: UpstreamError) -> Self {
        let message = err.to_string();
        match err {
            UpstreamError::Unreachable(detail) => Self::UpstreamUnavailable(detail),
            UpstreamError::Auth { status } => Self::Upstream {
                failure: UpstreamFailure::Auth,
                status: Some(status),
                message,
            },
            UpstreamError::PayloadTooLarge { status, .. } => Self::Upstream {
                failure: UpstreamFailure::PayloadTooLarge,
                status: Some(status),
                message,
            },
            UpstreamError::UnsupportedType { status, .. } => Self::Upstream {
                failure: UpstreamFailure::UnsupportedType,
                status: Some(status),
                message,
            },
            UpstreamError::NotFound { status, .. } => Self::Upstream {
                failure: UpstreamFailure::NotFound,
                status: Some(status),
                message,
            },
            UpstreamError::Status { status, .. } => Self::Upstream {
                failure: UpstreamFailure::Generic,
                status: Some(status),
                message,
            },
            UpstreamError::Request(detail) => Self::Internal(detail),
        }
    }
}

/// Transport-level session failure (missing, unknown, closed or expired id).
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("Bad Request: No valid session ID provided")]
    Missing,

    #[error("Bad Request: Session not found or expired")]
    Unknown(String),

    #[error("Bad Request: Session belongs to a different principal")]
    PrincipalMismatch(String),
}

impl SessionError {
    pub fn to_jsonrpc_error(&self) -> Value {
        json!({
            "code": ErrorKind::SessionInvalid.jsonrpc_code(),
            "message": self.to_string(),
            "data": { "kind": ErrorKind::SessionInvalid.as_str() }
        })
    }
}

/// Outward authentication failure. Deliberately carries no detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Unauthorized")]
pub struct Unauthorized;

/// Build a complete JSON-RPC error response.
pub fn error_response(id: Value, error: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": error,
    })
}

pub fn protocol_error(code: i64, message: &str) -> Value {
    json!({
        "code": code,
        "message": message,
    })
}
