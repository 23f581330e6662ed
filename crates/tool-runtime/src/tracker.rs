//! Tool-call lifecycle tracking for one streaming session.
//!
//! ```text
//! Idle -name-> NameReceived -input*-> InputStreaming -complete-> InputComplete
//!      -> Executing -result-> ResultReceived -> Idle
//! ```
//!
//! At most one call is in flight. Events that do not fit the current state
//! are protocol anomalies: logged, counted, and otherwise ignored.

use crate::record::{truncate_result, ToolEvent, ToolPhase};
use crate::stream::EventKind;
use serde_json::Value;
use std::fmt;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolCallState {
    Idle,
    NameReceived,
    InputStreaming,
    InputComplete,
    Executing,
    ResultReceived,
}

impl fmt::Display for ToolCallState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ToolCallState::Idle => "idle",
            ToolCallState::NameReceived => "name_received",
            ToolCallState::InputStreaming => "input_streaming",
            ToolCallState::InputComplete => "input_complete",
            ToolCallState::Executing => "executing",
            ToolCallState::ResultReceived => "result_received",
        };
        f.write_str(s)
    }
}

/// An event that implies a transition the current state does not allow.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unexpected {event} while {state}")]
pub struct ProtocolAnomaly {
    pub state: ToolCallState,
    pub event: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: ToolCallState,
    pub to: ToolCallState,
}

#[derive(Debug)]
pub struct ToolCallTracker {
    state: ToolCallState,
    tool_name: Option<String>,
    fragments: String,
    trace: Vec<Transition>,
    anomalies: usize,
}

impl ToolCallTracker {
    pub fn new() -> Self {
        Self {
            state: ToolCallState::Idle,
            tool_name: None,
            fragments: String::new(),
            trace: Vec::new(),
            anomalies: 0,
        }
    }

    /// Advance on `event`. Returns a milestone when the event moved the call
    /// forward in a way worth reporting.
    pub fn process_event(&mut self, event: &EventKind) -> Option<ToolEvent> {
        match self.transition(event) {
            Ok(milestone) => milestone,
            Err(anomaly) => {
                self.anomalies += 1;
                if matches!(event, EventKind::ToolCallStart { .. }) {
                    warn!(
                        state = %anomaly.state,
                        tool = ?self.tool_name,
                        "Tool call started while another is in flight, ignoring"
                    );
                } else {
                    debug!(state = %anomaly.state, event = anomaly.event, "Protocol anomaly");
                }
                None
            }
        }
    }

    fn transition(&mut self, event: &EventKind) -> Result<Option<ToolEvent>, ProtocolAnomaly> {
        use ToolCallState::*;

        match (self.state, event) {
            (Idle, EventKind::ToolCallStart { name, .. }) => {
                self.tool_name = Some(name.clone());
                self.fragments.clear();
                self.move_to(NameReceived);
                Ok(Some(ToolEvent::new(ToolPhase::Started, name.clone(), None)))
            }
            (NameReceived | InputStreaming, EventKind::ToolInput(fragment)) => {
                self.fragments.push_str(fragment);
                if self.state != InputStreaming {
                    self.move_to(InputStreaming);
                }
                Ok(None)
            }
            (NameReceived | InputStreaming, EventKind::ToolInputComplete | EventKind::BlockStop) => {
                Ok(Some(self.finish_input()))
            }
            // A block boundary with no call being assembled closes a text block.
            (_, EventKind::BlockStop) => Ok(None),
            (Executing, EventKind::ToolResult { content, is_error }) => {
                let name = self.tool_name.take().unwrap_or_default();
                self.move_to(ResultReceived);
                self.clear_call();
                self.move_to(Idle);
                let phase = if *is_error {
                    ToolPhase::Failed
                } else {
                    ToolPhase::Result
                };
                Ok(Some(ToolEvent::new(phase, name, Some(truncate_result(content)))))
            }
            (_, EventKind::Other | EventKind::UpstreamError(_)) => Ok(None),
            (state, event) => Err(ProtocolAnomaly {
                state,
                event: event_label(event),
            }),
        }
    }

    /// Parse the accumulated fragments once and enter `Executing`.
    fn finish_input(&mut self) -> ToolEvent {
        self.move_to(ToolCallState::InputComplete);

        let raw = std::mem::take(&mut self.fragments);
        let input = if raw.trim().is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(&raw).unwrap_or_else(|e| {
                debug!(error = %e, "Tool input is not valid JSON, keeping raw text");
                Value::String(raw)
            })
        };

        let name = self.tool_name.clone().unwrap_or_default();
        self.move_to(ToolCallState::Executing);
        ToolEvent::new(ToolPhase::Executing, name, Some(input.to_string()))
    }

    fn move_to(&mut self, to: ToolCallState) {
        self.trace.push(Transition {
            from: self.state,
            to,
        });
        self.state = to;
    }

    fn clear_call(&mut self) {
        self.tool_name = None;
        self.fragments.clear();
    }

    /// Drop any in-flight call and return to `Idle`. Trace and anomaly count
    /// are kept for diagnostics.
    pub fn reset(&mut self) {
        self.clear_call();
        if self.state != ToolCallState::Idle {
            self.move_to(ToolCallState::Idle);
        }
    }

    pub fn state(&self) -> ToolCallState {
        self.state
    }

    /// Name of the tool currently executing, if any.
    pub fn executing_tool(&self) -> Option<&str> {
        match self.state {
            ToolCallState::Executing => self.tool_name.as_deref(),
            _ => None,
        }
    }

    /// Name of the tool whose call has started but not resolved.
    pub fn in_flight_tool(&self) -> Option<&str> {
        match self.state {
            ToolCallState::Idle => None,
            _ => self.tool_name.as_deref(),
        }
    }

    pub fn trace(&self) -> &[Transition] {
        &self.trace
    }

    pub fn anomalies(&self) -> usize {
        self.anomalies
    }
}

impl Default for ToolCallTracker {
    fn default() -> Self {
        Self::new()
    }
}

fn event_label(event: &EventKind) -> &'static str {
    match event {
        EventKind::ToolCallStart { .. } => "tool call start",
        EventKind::ToolInput(_) => "tool input",
        EventKind::ToolInputComplete => "tool input complete",
        EventKind::BlockStop => "block stop",
        EventKind::ToolResult { .. } => "tool result",
        EventKind::UpstreamError(_) => "upstream error",
        EventKind::Other => "event",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use ToolCallState::*;

    fn start(name: &str) -> EventKind {
        EventKind::ToolCallStart {
            name: name.into(),
            id: None,
        }
    }

    fn input(fragment: &str) -> EventKind {
        EventKind::ToolInput(fragment.into())
    }

    fn parsed_input(event: &ToolEvent) -> Value {
        serde_json::from_str(event.detail.as_deref().unwrap()).unwrap()
    }

    fn result(content: &str) -> EventKind {
        EventKind::ToolResult {
            content: content.into(),
            is_error: false,
        }
    }

    #[test]
    fn test_full_lifecycle() {
        let mut tracker = ToolCallTracker::new();

        let started = tracker.process_event(&start("calc")).unwrap();
        assert_eq!(started.phase, ToolPhase::Started);
        assert_eq!(tracker.state(), NameReceived);

        assert!(tracker.process_event(&input("{\"x\":")).is_none());
        assert!(tracker.process_event(&input("2}")).is_none());
        assert_eq!(tracker.state(), InputStreaming);

        let executing = tracker.process_event(&EventKind::ToolInputComplete).unwrap();
        assert_eq!(executing.phase, ToolPhase::Executing);
        assert_eq!(executing.detail.as_deref(), Some(r#"{"x":2}"#));
        assert_eq!(tracker.executing_tool(), Some("calc"));
        assert_eq!(parsed_input(&executing), json!({"x": 2}));

        let done = tracker.process_event(&result("4")).unwrap();
        assert_eq!(done.phase, ToolPhase::Result);
        assert_eq!(done.detail.as_deref(), Some("4"));
        assert_eq!(tracker.state(), Idle);
        assert!(tracker.executing_tool().is_none());

        let path: Vec<_> = tracker.trace().iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![NameReceived, InputStreaming, InputComplete, Executing, ResultReceived, Idle]
        );
        assert_eq!(tracker.anomalies(), 0);
    }

    #[test]
    fn test_tool_without_arguments_gets_empty_object() {
        let mut tracker = ToolCallTracker::new();
        tracker.process_event(&start("list_scenes"));
        let executing = tracker.process_event(&EventKind::BlockStop).unwrap();
        assert_eq!(tracker.state(), Executing);
        assert_eq!(parsed_input(&executing), json!({}));
    }

    #[test]
    fn test_unparsable_input_is_kept_raw() {
        let mut tracker = ToolCallTracker::new();
        tracker.process_event(&start("shell"));
        tracker.process_event(&input("ls -la"));
        let executing = tracker.process_event(&EventKind::ToolInputComplete).unwrap();
        assert_eq!(parsed_input(&executing), json!("ls -la"));
    }

    #[test]
    fn test_second_start_while_executing_is_an_anomaly() {
        let mut tracker = ToolCallTracker::new();
        tracker.process_event(&start("first"));
        tracker.process_event(&EventKind::ToolInputComplete);

        assert!(tracker.process_event(&start("second")).is_none());
        assert_eq!(tracker.anomalies(), 1);
        assert_eq!(tracker.executing_tool(), Some("first"));

        let done = tracker.process_event(&result("ok")).unwrap();
        assert_eq!(done.tool_name, "first");
    }

    #[test]
    fn test_out_of_order_events_leave_state_untouched() {
        let mut tracker = ToolCallTracker::new();
        assert!(tracker.process_event(&result("orphan")).is_none());
        assert!(tracker.process_event(&input("{}")).is_none());
        assert!(tracker.process_event(&EventKind::ToolInputComplete).is_none());
        assert_eq!(tracker.state(), Idle);
        assert_eq!(tracker.anomalies(), 3);
        assert!(tracker.trace().is_empty());
    }

    #[test]
    fn test_block_stop_while_idle_is_not_an_anomaly() {
        let mut tracker = ToolCallTracker::new();
        assert!(tracker.process_event(&EventKind::BlockStop).is_none());
        assert_eq!(tracker.anomalies(), 0);
    }

    #[test]
    fn test_failed_result_is_truncated() {
        let mut tracker = ToolCallTracker::new();
        tracker.process_event(&start("file_read"));
        tracker.process_event(&EventKind::ToolInputComplete);
        let long = "x".repeat(500);
        let failed = tracker
            .process_event(&EventKind::ToolResult {
                content: long,
                is_error: true,
            })
            .unwrap();
        assert_eq!(failed.phase, ToolPhase::Failed);
        assert_eq!(failed.detail.unwrap().len(), 203);
    }

    #[test]
    fn test_reset_drops_in_flight_call() {
        let mut tracker = ToolCallTracker::new();
        tracker.process_event(&EventKind::ToolCallStart {
            name: "slow".into(),
            id: Some("t9".into()),
        });
        tracker.process_event(&EventKind::ToolInputComplete);
        assert_eq!(tracker.executing_tool(), Some("slow"));
        assert_eq!(tracker.in_flight_tool(), Some("slow"));

        tracker.reset();
        assert_eq!(tracker.state(), Idle);
        assert!(tracker.executing_tool().is_none());
        assert!(tracker.in_flight_tool().is_none());
        assert!(tracker.process_event(&start("next")).is_some());
    }
}
