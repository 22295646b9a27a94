use std::collections::HashMap;

use regex::Regex;
use serde_json::{json, Value};

use super::schema::{FieldSpec, InputSchema};

pub const SEND_FAX: &str = "send_fax";
pub const GET_FAX_STATUS: &str = "get_fax_status";

/// Destination numbers: optional `+`, then 7-20 digits, spaces, hyphens or
/// parentheses.
pub const PHONE_PATTERN: &str = r"^\+?[0-9 ()\-]{7,20}$";

/// Which executor path handles a tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    SendFax,
    GetFaxStatus,
}

#[derive(Debug, Clone)]
pub struct ToolDefinition {
    pub name: &'static str,
    pub description: &'static str,
    pub input: InputSchema,
    pub output: Option<Value>,
}

impl ToolDefinition {
    /// MCP `tools/list` entry.
    pub fn to_json(&self) -> Value {
        let mut tool = json!({
            "name": self.name,
            "description": self.description,
            "inputSchema": self.input.to_json(),
        });
        if let Some(output) = &self.output {
            tool["outputSchema"] = output.clone();
        }
        tool
    }
}

#[derive(Debug)]
pub struct ToolEntry {
    pub definition: ToolDefinition,
    pub kind: ToolKind,
    patterns: HashMap<&'static str, Regex>,
}

impl ToolEntry {
    fn new(definition: ToolDefinition, kind: ToolKind) -> Result<Self, regex::Error> {
        let mut patterns = HashMap::new();
        for field in &definition.input.fields {
            if let Some(pattern) = field.pattern {
                patterns.insert(field.name, Regex::new(pattern)?);
            }
        }
        Ok(Self {
            definition,
            kind,
            patterns,
        })
    }

    /// Whether `value` satisfies the declared pattern of `field` (fields
    /// without a pattern always match).
    pub fn matches_pattern(&self, field: &str, value: &str) -> bool {
        self.patterns
            .get(field)
            .map(|pattern| pattern.is_match(value))
            .unwrap_or(true)
    }
}

/// Static tool catalog, built once and shared by every transport.
#[derive(Debug)]
pub struct ToolRegistry {
    entries: Vec<ToolEntry>,
    index: HashMap<&'static str, usize>,
}

impl ToolRegistry {
    pub fn builtin() -> Result<Self, regex::Error> {
        Ok(Self::from_entries(vec![
            ToolEntry::new(send_fax_definition(), ToolKind::SendFax)?,
            ToolEntry::new(get_fax_status_definition(), ToolKind::GetFaxStatus)?,
        ]))
    }

    fn from_entries(entries: Vec<ToolEntry>) -> Self {
        let index = entries
            .iter()
            .enumerate()
            .map(|(position, entry)| (entry.definition.name, position))
            .collect();
        Self { entries, index }
    }

    pub fn list_tools(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.entries.iter().map(|entry| &entry.definition)
    }

    pub fn lookup(&self, name: &str) -> Option<&ToolEntry> {
        self.index.get(name).map(|position| &self.entries[*position])
    }

    /// `tools/list` result body.
    pub fn catalog_json(&self) -> Value {
        let tools = self
            .list_tools()
            .map(ToolDefinition::to_json)
            .collect::<Vec<_>>();
        json!({ "tools": tools })
    }
}

fn job_output_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "id": { "type": "string" },
            "to": { "type": "string" },
            "status": {
                "type": "string",
                "enum": ["queued", "in_progress", "SUCCESS", "failed", "disabled"]
            },
            "error": { "type": "string" },
            "pages": { "type": "integer" },
            "created_at": { "type": "string" },
            "updated_at": { "type": "string" }
        },
        "required": ["id", "status"]
    })
}

fn send_fax_definition() -> ToolDefinition {
    ToolDefinition {
        name: SEND_FAX,
        description: "Send a fax. Provide the destination number, the document as base64 \
                      (PDF or plain text) and its file name. Returns the job ID to poll with \
                      get_fax_status.",
        input: InputSchema::new(vec![
            FieldSpec::string("to", "Destination fax number (e.g., +15551234567)")
                .pattern(PHONE_PATTERN),
            FieldSpec::string("fileContent", "Base64-encoded PDF or TXT content").base64(),
            FieldSpec::string("fileName", "File name (e.g., document.pdf)"),
            FieldSpec::string(
                "fileType",
                "Optional override; inferred from the file name when omitted",
            )
            .optional()
            .one_of(&["pdf", "txt"]),
        ]),
        output: Some(job_output_schema()),
    }
}

fn get_fax_status_definition() -> ToolDefinition {
    ToolDefinition {
        name: GET_FAX_STATUS,
        description: "Retrieve the status of a fax job by ID.",
        input: InputSchema::new(vec![FieldSpec::string(
            "jobId",
            "Job ID returned by send_fax",
        )]),
        output: Some(job_output_schema()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_ordered_and_stable() {
        let registry = ToolRegistry::builtin().expect("builtin registry");
        let names = registry.list_tools().map(|tool| tool.name).collect::<Vec<_>>();
        assert_eq!(names, vec![SEND_FAX, GET_FAX_STATUS]);
        assert_eq!(registry.catalog_json(), registry.catalog_json());
    }

    #[test]
    fn send_fax_schema_advertises_contract() {
        let registry = ToolRegistry::builtin().expect("builtin registry");
        let catalog = registry.catalog_json();
        let send = &catalog["tools"][0];
        assert_eq!(send["name"], json!("send_fax"));
        assert_eq!(
            send["inputSchema"]["required"],
            json!(["to", "fileContent", "fileName"])
        );
        assert_eq!(
            send["inputSchema"]["properties"]["fileType"]["enum"],
            json!(["pdf", "txt"])
        );
        assert_eq!(
            send["inputSchema"]["properties"]["to"]["pattern"],
            json!(PHONE_PATTERN)
        );
        assert!(send.get("outputSchema").is_some());
    }

    #[test]
    fn lookup_dispatches_by_kind() {
        let registry = ToolRegistry::builtin().expect("builtin registry");
        assert_eq!(
            registry.lookup(GET_FAX_STATUS).map(|entry| entry.kind),
            Some(ToolKind::GetFaxStatus)
        );
        assert!(registry.lookup("delete_fax").is_none());
    }

    #[test]
    fn phone_pattern_accepts_common_shapes() {
        let registry = ToolRegistry::builtin().expect("builtin registry");
        let entry = registry.lookup(SEND_FAX).expect("send_fax entry");
        for ok in ["+15551234567", "(555) 123-4567", "5551234"] {
            assert!(entry.matches_pattern("to", ok), "{ok} should match");
        }
        for bad in ["not-a-number", "123", "+1555123456789012345678", "555.123.4567"] {
            assert!(!entry.matches_pattern("to", bad), "{bad} should not match");
        }
    }
}
