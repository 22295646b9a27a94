use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
}

impl FieldKind {
    fn json_type(self) -> &'static str {
        match self {
            Self::String => "string",
        }
    }
}

/// One declared argument of a tool.
#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub description: &'static str,
    pub enum_values: &'static [&'static str],
    pub pattern: Option<&'static str>,
    pub content_encoding: Option<&'static str>,
}

impl FieldSpec {
    pub const fn string(name: &'static str, description: &'static str) -> Self {
        Self {
            name,
            kind: FieldKind::String,
            required: true,
            description,
            enum_values: &[],
            pattern: None,
            content_encoding: None,
        }
    }

    pub const fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub const fn one_of(mut self, values: &'static [&'static str]) -> Self {
        self.enum_values = values;
        self
    }

    pub const fn pattern(mut self, pattern: &'static str) -> Self {
        self.pattern = Some(pattern);
        self
    }

    pub const fn base64(mut self) -> Self {
        self.content_encoding = Some("base64");
        self
    }

    fn to_json(&self) -> Value {
        let mut property = Map::new();
        property.insert("type".into(), json!(self.kind.json_type()));
        property.insert("description".into(), json!(self.description));
        if !self.enum_values.is_empty() {
            property.insert("enum".into(), json!(self.enum_values));
        }
        if let Some(pattern) = self.pattern {
            property.insert("pattern".into(), json!(pattern));
        }
        if let Some(encoding) = self.content_encoding {
            property.insert("contentEncoding".into(), json!(encoding));
        }
        Value::Object(property)
    }
}

/// Ordered field list of a tool's arguments object.
#[derive(Debug, Clone)]
pub struct InputSchema {
    pub fields: Vec<FieldSpec>,
}

impl InputSchema {
    pub fn new(fields: Vec<FieldSpec>) -> Self {
        Self { fields }
    }

    /// First required field absent (or null) in `args`.
    pub fn missing_required<'a>(&'a self, args: &Map<String, Value>) -> Option<&'a str> {
        self.fields
            .iter()
            .filter(|field| field.required)
            .find(|field| matches!(args.get(field.name), None | Some(Value::Null)))
            .map(|field| field.name)
    }

    pub fn to_json(&self) -> Value {
        let properties = self
            .fields
            .iter()
            .map(|field| (field.name.to_string(), field.to_json()))
            .collect::<Map<_, _>>();
        let required = self
            .fields
            .iter()
            .filter(|field| field.required)
            .map(|field| field.name)
            .collect::<Vec<_>>();
        json!({
            "type": "object",
            "properties": properties,
            "required": required,
            "additionalProperties": false,
        })
    }
}
