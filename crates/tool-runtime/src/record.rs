use relay_core::ErrorKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest tool result text carried in a record before truncation.
pub const RESULT_PREVIEW_CHARS: usize = 200;

/// One unit of caller-facing output from a streaming session.
///
/// A session yields any number of non-terminal records followed by exactly
/// one [`NormalizedRecord::Complete`] or [`NormalizedRecord::Error`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum NormalizedRecord {
    TextDelta { text: String },
    ToolEvent(ToolEvent),
    Progress { level: ProgressLevel, message: String },
    Error { kind: ErrorKind, message: String },
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolPhase {
    Started,
    Executing,
    Result,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressLevel {
    Info,
    Warning,
}

/// Human-readable milestone in a tool call's lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvent {
    pub phase: ToolPhase,
    pub tool_name: String,
    pub detail: Option<String>,
}

impl ToolEvent {
    pub fn new(phase: ToolPhase, tool_name: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            phase,
            tool_name: tool_name.into(),
            detail,
        }
    }
}

impl fmt::Display for ToolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.phase {
            ToolPhase::Started => write!(f, "Calling tool: {}", self.tool_name),
            ToolPhase::Executing => match &self.detail {
                Some(input) => write!(f, "Executing {} with input {}", self.tool_name, input),
                None => write!(f, "Executing {}", self.tool_name),
            },
            ToolPhase::Result => write!(
                f,
                "Result from {}: {}",
                self.tool_name,
                self.detail.as_deref().unwrap_or("")
            ),
            ToolPhase::Failed => write!(
                f,
                "Tool {} failed: {}",
                self.tool_name,
                self.detail.as_deref().unwrap_or("")
            ),
        }
    }
}

/// Caller-facing serialization: `{type, content?, error?, done}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireRecord {
    #[serde(rename = "type")]
    pub kind: WireKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub done: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireKind {
    Chunk,
    Complete,
    Error,
}

impl NormalizedRecord {
    pub fn text(text: impl Into<String>) -> Self {
        NormalizedRecord::TextDelta { text: text.into() }
    }

    pub fn info(message: impl Into<String>) -> Self {
        NormalizedRecord::Progress {
            level: ProgressLevel::Info,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        NormalizedRecord::Progress {
            level: ProgressLevel::Warning,
            message: message.into(),
        }
    }

    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        NormalizedRecord::Error {
            kind,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, NormalizedRecord::Complete | NormalizedRecord::Error { .. })
    }

    pub fn to_wire(&self) -> WireRecord {
        match self {
            NormalizedRecord::TextDelta { text } => WireRecord::chunk(text.clone()),
            NormalizedRecord::ToolEvent(event) => WireRecord::chunk(event.to_string()),
            NormalizedRecord::Progress { level, message } => WireRecord::chunk(match level {
                ProgressLevel::Info => message.clone(),
                ProgressLevel::Warning => format!("Warning: {message}"),
            }),
            NormalizedRecord::Error { kind, message } => WireRecord {
                kind: WireKind::Error,
                content: None,
                error: Some(format!("{kind}: {message}")),
                done: true,
            },
            NormalizedRecord::Complete => WireRecord {
                kind: WireKind::Complete,
                content: Some(String::new()),
                error: None,
                done: true,
            },
        }
    }
}

impl WireRecord {
    fn chunk(content: String) -> Self {
        Self {
            kind: WireKind::Chunk,
            content: Some(content),
            error: None,
            done: false,
        }
    }

    /// Compact JSON line for the caller.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            format!(r#"{{"type":"error","error":"unserializable record: {e}","done":true}}"#)
        })
    }
}

/// Truncate to [`RESULT_PREVIEW_CHARS`] characters, marking the cut with `...`.
pub fn truncate_result(text: &str) -> String {
    match text.char_indices().nth(RESULT_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
