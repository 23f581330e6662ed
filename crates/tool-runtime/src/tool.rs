use async_trait::async_trait;
use relay_core::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Describes a tool's interface for LLM consumption.
///
/// The same descriptor is used for local tools and for tools advertised by a
/// tool-server subprocess.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name (e.g., "echo", "calculator")
    pub name: String,
    /// Human-readable description for the LLM
    pub description: String,
    /// JSON Schema describing the expected input
    pub input_schema: Value,
}

/// Result of executing a tool, sent back to the LLM.
///
/// Failures are carried here as data (`is_error`) so the agent can relay
/// them to the model instead of aborting the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// Correlates the result with the invocation that produced it
    pub tool_call_id: String,
    /// Result content (text or structured)
    pub content: String,
    /// Whether this result represents an error
    pub is_error: bool,
    /// Set on failures produced by the runtime itself (timeouts, dead servers).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
}

impl ToolResult {
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
            error_kind: None,
        }
    }

    pub fn failure(
        tool_call_id: impl Into<String>,
        kind: ErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: message.into(),
            is_error: true,
            error_kind: Some(kind),
        }
    }
}

/// Context passed to tool execution.
pub struct ToolContext {
    /// Working directory for file/process operations
    pub working_directory: std::path::PathBuf,
}

/// The primary extension point: all tools implement this trait.
///
/// Tools are object-safe, Send + Sync, and async.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Returns the tool's definition (name, description, JSON Schema).
    fn definition(&self) -> ToolDefinition;

    /// Execute the tool with the given JSON input.
    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult, ToolError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ToolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ToolError::Timeout(_) => ErrorKind::Timeout,
            _ => ErrorKind::ToolInvocationFailure,
        }
    }
}

impl fmt::Display for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.description)
    }
}

/// Simple echo tool for testing purposes.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "echo".to_string(),
            description: "Echoes back the input message. For testing.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "message": {
                        "type": "string",
                        "description": "The message to echo back"
                    }
                },
                "required": ["message"]
            }),
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let message = input
            .get("message")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidInput("missing 'message' field".to_string()))?;

        // tool_call_id is set by the caller
        Ok(ToolResult::success(String::new(), message))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_result_failure_carries_kind() {
        let result = ToolResult::failure("call_001", ErrorKind::Timeout, "timed out after 5s");
        assert!(result.is_error);
        assert_eq!(result.error_kind, Some(ErrorKind::Timeout));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error_kind"], "timeout");
    }

    #[test]
    fn test_tool_result_success_omits_kind() {
        let result = ToolResult::success("call_001", "hello");
        let json = serde_json::to_string(&result).unwrap();
        assert!(!json.contains("error_kind"));
        let roundtrip: ToolResult = serde_json::from_str(&json).unwrap();
        assert_eq!(roundtrip.tool_call_id, "call_001");
        assert!(!roundtrip.is_error);
    }

    #[test]
    fn test_tool_error_kind() {
        assert_eq!(
            ToolError::Timeout(std::time::Duration::from_secs(1)).kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            ToolError::ExecutionFailed("boom".into()).kind(),
            ErrorKind::ToolInvocationFailure
        );
    }

    #[tokio::test]
    async fn test_echo_tool() {
        let tool = EchoTool;
        let def = tool.definition();
        assert_eq!(def.name, "echo");

        let ctx = ToolContext {
            working_directory: std::path::PathBuf::from("/tmp"),
        };
        let result = tool
            .execute(serde_json::json!({"message": "hello world"}), &ctx)
            .await
            .unwrap();
        assert_eq!(result.content, "hello world");
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_echo_tool_rejects_missing_message() {
        let ctx = ToolContext {
            working_directory: std::path::PathBuf::from("/tmp"),
        };
        let err = EchoTool.execute(serde_json::json!({}), &ctx).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }
}
