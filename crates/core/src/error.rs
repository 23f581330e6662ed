use std::fmt;

use serde::{Deserialize, Serialize};

/// Classification shared by every error surfaced to a caller.
///
/// Crate-level error enums map onto one of these via their `kind()` method so
/// that terminal stream records and structured tool failures carry a stable tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A worker or process did not reach a ready state within its timeout.
    Initialization,
    /// An otherwise healthy call exceeded its bound.
    Timeout,
    /// Tool-server launch or handshake failed.
    ToolServerUnavailable,
    /// The remote tool reported or caused an error.
    ToolInvocationFailure,
    /// An event implied a tool-lifecycle transition invalid for the current state.
    ProtocolAnomaly,
    /// The upstream event source failed while being iterated.
    StreamFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Initialization => "initialization",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ToolServerUnavailable => "tool_server_unavailable",
            ErrorKind::ToolInvocationFailure => "tool_invocation_failure",
            ErrorKind::ProtocolAnomaly => "protocol_anomaly",
            ErrorKind::StreamFailure => "stream_failure",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
