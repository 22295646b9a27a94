use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::{Map, Value};

use super::registry::{ToolEntry, ToolKind, ToolRegistry};
use crate::error::ToolError;
use crate::upstream::{FileType, SendFaxRequest};

/// A tool call whose arguments passed every check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidatedCall {
    SendFax(SendFaxRequest),
    GetFaxStatus { job_id: String },
}

/// Check a raw call against the registry. Pure: never touches the network.
pub fn validate_call(
    registry: &ToolRegistry,
    name: &str,
    arguments: &Value,
) -> Result<ValidatedCall, ToolError> {
    let entry = registry
        .lookup(name)
        .ok_or_else(|| ToolError::MethodNotFound(name.to_string()))?;

    let empty = Map::new();
    let args = match arguments {
        Value::Object(map) => map,
        Value::Null => &empty,
        _ => {
            return Err(ToolError::invalid_params(format!(
                "Arguments for '{name}' must be a JSON object"
            )))
        }
    };

    if let Some(field) = entry.definition.input.missing_required(args) {
        return Err(ToolError::invalid_params(format!(
            "Missing required parameter '{field}' for '{name}'"
        )));
    }

    match entry.kind {
        ToolKind::SendFax => validate_send_fax(entry, args).map(ValidatedCall::SendFax),
        ToolKind::GetFaxStatus => {
            let job_id = string_arg(args, "jobId")?.unwrap_or_default().trim();
            if job_id.is_empty() {
                return Err(ToolError::invalid_params("'jobId' must not be empty"));
            }
            if job_id.contains(['/', '?', '#']) {
                return Err(ToolError::invalid_params(
                    "'jobId' contains characters that are not allowed",
                ));
            }
            Ok(ValidatedCall::GetFaxStatus {
                job_id: job_id.to_string(),
            })
        }
    }
}

fn validate_send_fax(
    entry: &ToolEntry,
    args: &Map<String, Value>,
) -> Result<SendFaxRequest, ToolError> {
    let to = string_arg(args, "to")?.unwrap_or_default().trim();
    if !entry.matches_pattern("to", to) {
        return Err(ToolError::invalid_params(
            "'to' must be a phone number: optional '+', then 7-20 digits, spaces, hyphens or parentheses",
        ));
    }

    let file_name = string_arg(args, "fileName")?.unwrap_or_default().trim();
    if file_name.is_empty() {
        return Err(ToolError::invalid_params("'fileName' must not be empty"));
    }

    let file_type = match string_arg(args, "fileType")? {
        Some(raw) => FileType::parse(raw.trim())
            .ok_or_else(|| ToolError::invalid_params("fileType must be 'pdf' or 'txt'"))?,
        None => infer_file_type(file_name).ok_or_else(|| {
            ToolError::invalid_params("Unsupported file type; specify 'fileType' as 'pdf' or 'txt'")
        })?,
    };

    let encoded = string_arg(args, "fileContent")?.unwrap_or_default();
    let content = decode_content(encoded)?;

    Ok(SendFaxRequest {
        to: to.to_string(),
        file_name: file_name.to_string(),
        file_type,
        content,
    })
}

/// Optional string argument; present-but-not-a-string is rejected.
fn string_arg<'a>(args: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>, ToolError> {
    match args.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(value)) => Ok(Some(value.as_str())),
        Some(_) => Err(ToolError::invalid_params(format!("'{key}' must be a string"))),
    }
}

fn infer_file_type(file_name: &str) -> Option<FileType> {
    let (_, extension) = file_name.rsplit_once('.')?;
    FileType::parse(extension)
}

fn decode_content(encoded: &str) -> Result<Vec<u8>, ToolError> {
    let compact = encoded
        .chars()
        .filter(|ch| !ch.is_ascii_whitespace())
        .collect::<String>();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|_| ToolError::invalid_params("fileContent is not valid base64"))?;
    if bytes.is_empty() {
        return Err(ToolError::invalid_params("File content is empty"));
    }
    Ok(bytes)
}
