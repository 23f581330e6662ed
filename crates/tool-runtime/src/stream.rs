//! Shapes of raw agent events.
//!
//! Agent backends emit loosely-typed JSON. Everything the runtime understands
//! about those events is decided here, against a closed set of recognized
//! shapes. Events may arrive bare or wrapped as `{"event": {...}}`.

use serde_json::Value;

/// Bookkeeping keys that never carry user-facing text.
const METADATA_KEYS: &[&str] = &[
    "init_event_loop",
    "start",
    "start_event_loop",
    "agent",
    "event_loop_metrics",
    "traces",
    "spans",
];

/// Tool-lifecycle meaning of a raw event.
#[derive(Debug, Clone, PartialEq)]
pub enum EventKind {
    /// The model names the tool it wants to call.
    ToolCallStart { name: String, id: Option<String> },
    /// A fragment of the call's JSON arguments.
    ToolInput(String),
    /// The arguments are complete.
    ToolInputComplete,
    /// A content block closed. Completes a call's input only while one is
    /// being assembled; otherwise it is a plain block boundary.
    BlockStop,
    /// The tool produced its result.
    ToolResult { content: String, is_error: bool },
    /// The upstream reported a failure (`error` / `force_stop`).
    UpstreamError(String),
    /// Nothing tool-related; may still carry text.
    Other,
}

impl EventKind {
    pub fn classify(raw: &Value) -> Self {
        if let Some(message) = upstream_error(raw) {
            return EventKind::UpstreamError(message);
        }

        let event = unwrap_event(raw);
        let Some(obj) = event.as_object() else {
            return EventKind::Other;
        };

        if let Some(start) = obj.get("tool_call_start") {
            return match start {
                Value::String(name) => EventKind::ToolCallStart {
                    name: name.clone(),
                    id: None,
                },
                other => tool_start_from(other, "id"),
            };
        }
        if let Some(block) = obj.get("contentBlockStart") {
            if let Some(tool_use) = block.pointer("/start/toolUse") {
                return tool_start_from(tool_use, "toolUseId");
            }
            if let Some(content) = block.get("contentBlock") {
                if content.get("type").and_then(Value::as_str) == Some("tool_use") {
                    return tool_start_from(content, "id");
                }
            }
            return EventKind::Other;
        }

        if let Some(input) = obj.get("tool_input") {
            return EventKind::ToolInput(fragment(input));
        }
        if let Some(delta) = obj.get("contentBlockDelta").and_then(|d| d.get("delta")) {
            if let Some(input) = delta.pointer("/toolUse/input").or_else(|| delta.get("input")) {
                return EventKind::ToolInput(fragment(input));
            }
            return EventKind::Other;
        }

        if obj.contains_key("tool_input_complete") {
            return EventKind::ToolInputComplete;
        }
        if obj.contains_key("contentBlockStop") {
            return EventKind::BlockStop;
        }

        if let Some(result) = obj.get("tool_result") {
            return tool_result_from(result);
        }
        if let Some(items) = obj
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
        {
            for item in items {
                if item.get("type").and_then(Value::as_str) == Some("tool_result") {
                    return tool_result_from(item);
                }
                if let Some(result) = item.get("toolResult") {
                    return tool_result_from(result);
                }
            }
        }

        EventKind::Other
    }
}

/// `null`, `""`, `{}` and `[]` carry nothing and are skipped outright.
pub fn is_empty_event(raw: &Value) -> bool {
    match raw {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Pull user-facing text out of an event, if it is one of the text shapes.
pub fn extract_text(raw: &Value) -> Option<String> {
    let text = match raw {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => {
            if let Some(Value::String(data)) = obj.get("data") {
                Some(data.clone())
            } else if METADATA_KEYS.iter().any(|k| obj.contains_key(*k)) {
                None
            } else if let Some(event) = obj.get("event") {
                event
                    .pointer("/contentBlockDelta/delta/text")
                    .and_then(Value::as_str)
                    .map(String::from)
            } else if let Some(Value::String(text)) = obj.get("text") {
                Some(text.clone())
            } else if let Some(Value::String(content)) = obj.get("content") {
                Some(content.clone())
            } else {
                obj.get("contentBlockDelta")
                    .and_then(|delta| delta.pointer("/delta/text"))
                    .and_then(Value::as_str)
                    .map(String::from)
            }
        }
        _ => None,
    };
    text.filter(|t| !t.is_empty())
}

/// Render tool result content (string, `[{"text": ..}]` list, or object) as text.
pub fn render_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.clone(),
                other => other
                    .get("text")
                    .and_then(Value::as_str)
                    .map(String::from)
                    .unwrap_or_else(|| other.to_string()),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(obj) => obj
            .get("text")
            .and_then(Value::as_str)
            .map(String::from)
            .unwrap_or_else(|| content.to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn unwrap_event(raw: &Value) -> &Value {
    match raw.get("event") {
        Some(inner) if inner.is_object() => inner,
        _ => raw,
    }
}

fn upstream_error(raw: &Value) -> Option<String> {
    let obj = raw.as_object()?;
    if obj.get("force_stop").and_then(Value::as_bool) == Some(true) {
        let reason = obj
            .get("force_stop_reason")
            .map(render_content)
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "agent stopped the event loop".to_string());
        return Some(reason);
    }
    match obj.get("error") {
        None | Some(Value::Null) => None,
        Some(err) => {
            let message = err
                .get("message")
                .map(render_content)
                .unwrap_or_else(|| render_content(err));
            Some(message)
        }
    }
}

fn tool_start_from(value: &Value, id_key: &str) -> EventKind {
    let name = value
        .get("name")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_string();
    let id = value.get(id_key).and_then(Value::as_str).map(String::from);
    EventKind::ToolCallStart { name, id }
}

fn fragment(input: &Value) -> String {
    match input {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn tool_result_from(result: &Value) -> EventKind {
    if let Value::String(text) = result {
        return EventKind::ToolResult {
            content: text.clone(),
            is_error: false,
        };
    }
    let is_error = result.get("is_error").and_then(Value::as_bool) == Some(true)
        || result.get("success").and_then(Value::as_bool) == Some(false)
        || result.get("status").and_then(Value::as_str) == Some("error");
    let content = result
        .get("content")
        .or_else(|| result.get("text"))
        .map(render_content)
        .unwrap_or_default();
    EventKind::ToolResult { content, is_error }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_plain_tool_shapes() {
        assert_eq!(
            EventKind::classify(&json!({"tool_call_start": "calc"})),
            EventKind::ToolCallStart {
                name: "calc".into(),
                id: None
            }
        );
        assert_eq!(
            EventKind::classify(&json!({"tool_input": "{\"x\":"})),
            EventKind::ToolInput("{\"x\":".into())
        );
        assert_eq!(
            EventKind::classify(&json!({"tool_input_complete": true})),
            EventKind::ToolInputComplete
        );
        assert_eq!(
            EventKind::classify(&json!({"tool_result": "4"})),
            EventKind::ToolResult {
                content: "4".into(),
                is_error: false
            }
        );
    }

    #[test]
    fn test_wrapped_content_block_shapes() {
        let start = json!({"event": {"contentBlockStart": {"start": {"toolUse": {"name": "file_read", "toolUseId": "t1"}}}}});
        assert_eq!(
            EventKind::classify(&start),
            EventKind::ToolCallStart {
                name: "file_read".into(),
                id: Some("t1".into())
            }
        );

        let legacy = json!({"contentBlockStart": {"contentBlock": {"type": "tool_use", "name": "shell", "id": "t2"}}});
        assert_eq!(
            EventKind::classify(&legacy),
            EventKind::ToolCallStart {
                name: "shell".into(),
                id: Some("t2".into())
            }
        );

        let delta = json!({"event": {"contentBlockDelta": {"delta": {"toolUse": {"input": "{\"path\":"}}}}});
        assert_eq!(
            EventKind::classify(&delta),
            EventKind::ToolInput("{\"path\":".into())
        );

        let stop = json!({"event": {"contentBlockStop": {"contentBlockIndex": 1}}});
        assert_eq!(EventKind::classify(&stop), EventKind::BlockStop);
    }

    #[test]
    fn test_text_delta_is_not_a_tool_event() {
        let delta = json!({"event": {"contentBlockDelta": {"delta": {"text": "hi"}}}});
        assert_eq!(EventKind::classify(&delta), EventKind::Other);
        assert_eq!(extract_text(&delta).as_deref(), Some("hi"));
    }

    #[test]
    fn test_message_tool_result_shapes() {
        let anthropic = json!({"message": {"content": [
            {"type": "tool_result", "tool_use_id": "t1", "content": [{"text": "42 lines"}]}
        ]}});
        assert_eq!(
            EventKind::classify(&anthropic),
            EventKind::ToolResult {
                content: "42 lines".into(),
                is_error: false
            }
        );

        let strands = json!({"message": {"role": "user", "content": [
            {"toolResult": {"toolUseId": "t1", "status": "error", "content": [{"text": "no such file"}]}}
        ]}});
        assert_eq!(
            EventKind::classify(&strands),
            EventKind::ToolResult {
                content: "no such file".into(),
                is_error: true
            }
        );
    }

    #[test]
    fn test_upstream_error_shapes() {
        assert_eq!(
            EventKind::classify(&json!({"error": {"message": "throttled"}})),
            EventKind::UpstreamError("throttled".into())
        );
        assert_eq!(
            EventKind::classify(&json!({"force_stop": true, "force_stop_reason": "context overflow"})),
            EventKind::UpstreamError("context overflow".into())
        );
        assert_eq!(
            EventKind::classify(&json!({"error": null, "data": "fine"})),
            EventKind::Other
        );
    }

    #[test]
    fn test_extract_text_shapes() {
        assert_eq!(extract_text(&json!("raw")).as_deref(), Some("raw"));
        assert_eq!(extract_text(&json!({"data": "x", "agent": {}})).as_deref(), Some("x"));
        assert_eq!(extract_text(&json!({"text": "t"})).as_deref(), Some("t"));
        assert_eq!(extract_text(&json!({"content": "c"})).as_deref(), Some("c"));
        assert_eq!(extract_text(&json!({"start": true, "text": "hidden"})), None);
        assert_eq!(extract_text(&json!({"event_loop_metrics": {}})), None);
        assert_eq!(extract_text(&json!({"content": [{"text": "not plain"}]})), None);
        assert_eq!(extract_text(&json!(17)), None);
        assert_eq!(extract_text(&json!({"text": ""})), None);
        assert_eq!(
            extract_text(&json!({"contentBlockDelta": {"delta": {"text": "bare"}}})).as_deref(),
            Some("bare")
        );
        assert_eq!(
            extract_text(&json!({"event": {"contentBlockDelta": {"delta": {"text": "wrapped"}}}}))
                .as_deref(),
            Some("wrapped")
        );
    }

    #[test]
    fn test_empty_events() {
        assert!(is_empty_event(&Value::Null));
        assert!(is_empty_event(&json!("")));
        assert!(is_empty_event(&json!({})));
        assert!(is_empty_event(&json!([])));
        assert!(!is_empty_event(&json!(0)));
        assert!(!is_empty_event(&json!({"text": "a"})));
    }

    #[test]
    fn test_render_content() {
        assert_eq!(render_content(&json!([{"text": "a"}, "b"])), "a\nb");
        assert_eq!(render_content(&json!({"value": 1})), "{\"value\":1}");
        assert_eq!(render_content(&Value::Null), "");
    }
}
