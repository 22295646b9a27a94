use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;

use crate::error::{
    error_response, protocol_error, ToolError, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
use crate::executor::ToolExecutor;

pub const SERVER_NAME: &str = "faxbot-mcp";
pub const SERVER_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const DEFAULT_PROTOCOL_VERSION: &str = "2025-03-26";

const INSTRUCTIONS: &str = "Send faxes with send_fax (base64 PDF or TXT plus a destination \
                            number) and poll their progress with get_fax_status.";

/// Channel for server-initiated messages (progress notifications) to the
/// client of the session that issued a call.
pub type Outbound = mpsc::Sender<Value>;

/// Shared JSON-RPC layer behind every transport.
#[derive(Clone)]
pub struct McpHandler {
    executor: Arc<ToolExecutor>,
}

impl McpHandler {
    pub fn new(executor: Arc<ToolExecutor>) -> Self {
        Self { executor }
    }

    /// Handle one raw frame. Returns the response to write back, or `None`
    /// when the frame only carried notifications.
    pub async fn handle_text(&self, raw: &str, outbound: Option<&Outbound>) -> Option<Value> {
        match serde_json::from_str::<Value>(raw) {
            Ok(message) => self.handle_value(message, outbound).await,
            Err(err) => {
                tracing::debug!("Rejecting unparseable frame: {err}");
                Some(parse_error())
            }
        }
    }

    /// Single message or batch.
    pub async fn handle_value(&self, message: Value, outbound: Option<&Outbound>) -> Option<Value> {
        match message {
            Value::Array(batch) if batch.is_empty() => Some(error_response(
                Value::Null,
                protocol_error(INVALID_REQUEST, "Invalid Request: empty batch"),
            )),
            Value::Array(batch) => {
                let mut responses = Vec::with_capacity(batch.len());
                for item in batch {
                    if let Some(response) = self.handle_message(item, outbound).await {
                        responses.push(response);
                    }
                }
                (!responses.is_empty()).then(|| Value::Array(responses))
            }
            single => self.handle_message(single, outbound).await,
        }
    }

    pub async fn handle_message(&self, message: Value, outbound: Option<&Outbound>) -> Option<Value> {
        let envelope = match Envelope::classify(&message) {
            Ok(envelope) => envelope,
            Err(id) => {
                return Some(error_response(
                    id,
                    protocol_error(INVALID_REQUEST, "Invalid Request"),
                ))
            }
        };

        match envelope {
            Envelope::Response => {
                tracing::debug!("Ignoring client response: {message}");
                None
            }
            Envelope::Notification { method } => {
                tracing::debug!("Notification received: {method}");
                None
            }
            Envelope::Request { id, method } => {
                let params = message.get("params").cloned().unwrap_or(Value::Null);
                Some(self.handle_request(id, method, params, outbound).await)
            }
        }
    }

    async fn handle_request(
        &self,
        id: Value,
        method: &str,
        params: Value,
        outbound: Option<&Outbound>,
    ) -> Value {
        match method {
            "initialize" => result_response(id, initialize_result(&params)),
            "ping" => result_response(id, json!({})),
            "tools/list" => result_response(id, self.executor.registry().catalog_json()),
            "tools/call" => self.call_tool(id, params, outbound).await,
            other => error_response(
                id,
                protocol_error(METHOD_NOT_FOUND, &format!("Method not found: {other}")),
            ),
        }
    }

    async fn call_tool(&self, id: Value, params: Value, outbound: Option<&Outbound>) -> Value {
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return error_response(
                id,
                ToolError::invalid_params("tools/call requires a string 'name'").to_jsonrpc_error(),
            );
        };
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);
        let progress = ProgressReporter::new(&params, outbound);

        let result = match self.executor.prepare(name, &arguments) {
            Ok(call) => {
                progress.report(0, "Calling fax service").await;
                let result = self.executor.execute(name, call).await;
                progress.report(1, "Done").await;
                result
            }
            Err(err) => Err(err),
        };

        match result {
            Ok(output) => result_response(id, output.to_call_result()),
            Err(err) => error_response(id, err.to_jsonrpc_error()),
        }
    }
}

/// Shape of a well-formed JSON-RPC 2.0 message.
enum Envelope<'a> {
    Request { id: Value, method: &'a str },
    Notification { method: &'a str },
    Response,
}

impl<'a> Envelope<'a> {
    /// On failure returns the id to answer with (null when unusable).
    fn classify(message: &'a Value) -> Result<Self, Value> {
        let Some(object) = message.as_object() else {
            return Err(Value::Null);
        };
        let id = object.get("id").cloned();
        let usable_id = id
            .clone()
            .filter(|id| id.is_string() || id.is_number())
            .unwrap_or(Value::Null);
        if object.get("jsonrpc").and_then(Value::as_str) != Some("2.0") {
            return Err(usable_id);
        }
        match (object.get("method").and_then(Value::as_str), id) {
            (Some(method), None) => Ok(Self::Notification { method }),
            (Some(method), Some(id)) if id.is_string() || id.is_number() => {
                Ok(Self::Request { id, method })
            }
            (None, Some(_)) if object.contains_key("result") || object.contains_key("error") => {
                Ok(Self::Response)
            }
            _ => Err(usable_id),
        }
    }
}

struct ProgressReporter<'a> {
    token: Option<Value>,
    outbound: Option<&'a Outbound>,
}

impl<'a> ProgressReporter<'a> {
    fn new(params: &Value, outbound: Option<&'a Outbound>) -> Self {
        let token = params
            .get("_meta")
            .and_then(|meta| meta.get("progressToken"))
            .filter(|token| token.is_string() || token.is_number())
            .cloned();
        Self { token, outbound }
    }

    async fn report(&self, progress: u32, message: &str) {
        let (Some(token), Some(outbound)) = (&self.token, self.outbound) else {
            return;
        };
        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/progress",
            "params": {
                "progressToken": token,
                "progress": progress,
                "total": 1,
                "message": message,
            }
        });
        if outbound.send(notification).await.is_err() {
            tracing::debug!("Progress notification dropped: session stream closed");
        }
    }
}

fn initialize_result(params: &Value) -> Value {
    let protocol_version = params
        .get("protocolVersion")
        .and_then(Value::as_str)
        .filter(|version| !version.trim().is_empty())
        .unwrap_or(DEFAULT_PROTOCOL_VERSION);
    json!({
        "protocolVersion": protocol_version,
        "capabilities": { "tools": { "listChanged": false } },
        "serverInfo": { "name": SERVER_NAME, "version": SERVER_VERSION },
        "instructions": INSTRUCTIONS,
    })
}

fn result_response(id: Value, result: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

pub fn parse_error() -> Value {
    error_response(Value::Null, protocol_error(PARSE_ERROR, "Parse error"))
}

pub fn is_initialize_request(message: &Value) -> bool {
    match message {
        Value::Array(batch) => batch.iter().any(is_initialize_request),
        single => single.get("method").and_then(Value::as_str) == Some("initialize"),
    }
}

/// True when a message (or every member of a batch) expects no response.
pub fn is_notification_only(message: &Value) -> bool {
    match message {
        Value::Array(batch) => !batch.is_empty() && batch.iter().all(is_notification_only),
        single => single.get("id").is_none(),
    }
}
