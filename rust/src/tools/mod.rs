pub mod registry;
pub mod schema;
pub mod validate;

pub use registry::{ToolDefinition, ToolEntry, ToolKind, ToolRegistry, GET_FAX_STATUS, SEND_FAX};
pub use schema::{FieldKind, FieldSpec, InputSchema};
pub use validate::{validate_call, ValidatedCall};
