//! Tool trait and helpers.

use std::time::Duration;

use async_trait::async_trait;

pub use crate::error::ToolError;

/// Per-call execution context. The user is taken from the authenticated
/// request, never from model-supplied arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToolContext {
    pub user_id: i64,
}

/// Output of a tool execution.
#[derive(Debug, Clone)]
pub struct ToolOutput {
    /// JSON result handed back to the model and reported to the client.
    pub result: serde_json::Value,
    pub duration: Duration,
}

impl ToolOutput {
    pub fn success(result: serde_json::Value, duration: Duration) -> Self {
        Self { result, duration }
    }

    /// `{success: false, error, message}` result for a handled failure.
    pub fn failure(error: &str, message: impl Into<String>, duration: Duration) -> Self {
        Self {
            result: serde_json::json!({
                "success": false,
                "error": error,
                "message": message.into(),
            }),
            duration,
        }
    }
}

/// A capability the chat assistant can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema for the tool's parameters.
    fn parameters_schema(&self) -> serde_json::Value;

    async fn execute(
        &self,
        params: serde_json::Value,
        ctx: &ToolContext,
    ) -> Result<ToolOutput, ToolError>;
}

/// Fetch a required, non-blank string parameter.
pub fn require_str<'a>(params: &'a serde_json::Value, key: &str) -> Result<&'a str, ToolError> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidParameters(format!("missing required parameter '{key}'")))
}

/// Fetch an optional, non-blank string parameter.
pub fn optional_str<'a>(params: &'a serde_json::Value, key: &str) -> Option<&'a str> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Fetch an optional integer parameter, accepting numeric strings.
pub fn optional_i64(params: &serde_json::Value, key: &str) -> Option<i64> {
    match params.get(key)? {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}
