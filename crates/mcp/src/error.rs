//! Error types for the MCP crate.

use std::time::Duration;

use relay_core::ErrorKind;
use relay_tool_runtime::BridgeError;

use crate::types::{error_codes, JsonRpcError};

/// Errors that can occur during MCP operations.
#[derive(Debug, thiserror::Error)]
pub enum McpError {
    /// Failed to parse JSON.
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    /// Transport I/O error.
    #[error("Transport error: {0}")]
    Transport(#[from] std::io::Error),

    /// The requested method is not supported.
    #[error("Method not found: {0}")]
    MethodNotFound(String),

    /// Invalid parameters for a method.
    #[error("Invalid params: {0}")]
    InvalidParams(String),

    /// The requested tool was not found in the registry.
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// Tool execution failed.
    #[error("Tool execution failed: {0}")]
    ToolExecution(String),

    /// The tool server process could not be launched, exited, or never
    /// completed the handshake.
    #[error("Server unavailable: {0}")]
    ServerUnavailable(String),

    /// A request exceeded its bound.
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The owning bridge refused or lost the operation.
    #[error("Bridge error: {0}")]
    Bridge(BridgeError),

    /// The peer answered with a JSON-RPC error object.
    #[error("Remote error {code}: {message}")]
    Remote { code: i64, message: String },

    /// The tool-server descriptor file could not be used.
    #[error("Invalid tool server config: {0}")]
    InvalidConfig(String),
}

impl From<BridgeError> for McpError {
    fn from(e: BridgeError) -> Self {
        match e {
            BridgeError::Timeout(d) => McpError::Timeout(d),
            BridgeError::Initialization(msg) => McpError::ServerUnavailable(msg),
            other => McpError::Bridge(other),
        }
    }
}

impl McpError {
    /// Convert to a JSON-RPC error object.
    pub fn to_rpc_error(&self) -> JsonRpcError {
        let code = match self {
            McpError::JsonParse(_) => error_codes::PARSE_ERROR,
            McpError::MethodNotFound(_) => error_codes::METHOD_NOT_FOUND,
            McpError::InvalidParams(_) | McpError::ToolNotFound(_) => error_codes::INVALID_PARAMS,
            McpError::Remote { code, .. } => *code,
            _ => error_codes::INTERNAL_ERROR,
        };
        JsonRpcError {
            code,
            message: self.to_string(),
            data: None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            McpError::Timeout(_) => ErrorKind::Timeout,
            McpError::ServerUnavailable(_) | McpError::InvalidConfig(_) => {
                ErrorKind::ToolServerUnavailable
            }
            McpError::Bridge(e) => e.kind(),
            McpError::JsonParse(_) | McpError::Transport(_) => ErrorKind::ProtocolAnomaly,
            McpError::MethodNotFound(_)
            | McpError::InvalidParams(_)
            | McpError::ToolNotFound(_)
            | McpError::ToolExecution(_)
            | McpError::Remote { .. } => ErrorKind::ToolInvocationFailure,
        }
    }
}
