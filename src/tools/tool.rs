//! The capability contract every plugin implements.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

/// Errors a plugin may hit internally. They never escape [`Tool::execute`].
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    #[error("{0}")]
    NotConfigured(String),

    #[error("{0}")]
    ExecutionFailed(String),
}

/// Declarative description of a capability, handed to the assistant's tool-call mechanism.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolDescriptor {
    pub source_name: String,
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolDescriptor {
    /// Names listed in the schema's `required` array.
    pub fn required(&self) -> Vec<&str> {
        self.parameters
            .get("required")
            .and_then(Value::as_array)
            .map(|names| names.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

/// Where a tool call came from.
#[derive(Debug, Clone, Default)]
pub struct ToolContext {
    pub conversation_id: Option<String>,
    pub run_id: Option<String>,
    pub tool_call_id: Option<String>,
}

/// A capability plugin.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Function name the assistant calls.
    fn name(&self) -> &str;

    /// Human-readable name of the upstream source.
    fn source_name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the accepted parameters.
    fn parameters_schema(&self) -> Value;

    fn describe(&self) -> ToolDescriptor {
        ToolDescriptor {
            source_name: self.source_name().to_string(),
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }

    /// Run the capability. Errors are reported through [`Tool::execute`].
    async fn invoke(&self, params: Value, ctx: &ToolContext) -> Result<Value, ToolError>;

    /// Run the capability, folding any failure into an `{"error": ...}` payload.
    async fn execute(&self, params: Value, ctx: &ToolContext) -> Value {
        match self.invoke(params, ctx).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(tool = %self.name(), "Tool failed: {}", e);
                serde_json::json!({ "error": e.to_string() })
            }
        }
    }
}

/// Extract a required, non-empty string parameter.
pub fn require_str<'a>(params: &'a Value, name: &str) -> Result<&'a str, ToolError> {
    params
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing '{}' parameter", name)))
}

/// Extract an optional string parameter.
pub fn optional_str<'a>(params: &'a Value, name: &str) -> Option<&'a str> {
    params
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
}
