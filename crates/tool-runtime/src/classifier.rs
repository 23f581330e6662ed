//! Normalizes a raw agent event stream into [`NormalizedRecord`]s.
//!
//! One classifier run owns its tracker and watchdog; nothing is shared
//! between sessions. The output is lazy and single-pass: each poll pulls at
//! most one upstream event (or one watchdog tick) and yields the records it
//! produced in arrival order, ending with exactly one terminal record.

use crate::agent::AgentError;
use crate::record::NormalizedRecord;
use crate::stream::{extract_text, is_empty_event, EventKind};
use crate::tracker::ToolCallTracker;
use crate::watchdog::StallWatchdog;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use relay_core::{ErrorKind, WatchdogConfig};
use serde_json::Value;
use std::collections::VecDeque;
use std::pin::Pin;
use tokio::time::Instant;
use tracing::{debug, info};

type Source = Pin<Box<dyn Stream<Item = Result<Value, AgentError>> + Send>>;

#[derive(Debug, Clone, Default)]
pub struct StreamEventClassifier {
    config: WatchdogConfig,
}

impl StreamEventClassifier {
    pub fn new(config: WatchdogConfig) -> Self {
        Self { config }
    }

    pub fn classify_stream<S>(&self, source: S) -> BoxStream<'static, NormalizedRecord>
    where
        S: Stream<Item = Result<Value, AgentError>> + Send + 'static,
    {
        let state = State {
            source: Box::pin(source),
            tracker: ToolCallTracker::new(),
            watchdog: StallWatchdog::new(self.config.clone(), Instant::now()),
            pending: VecDeque::new(),
            last_text: None,
            events: 0,
            finished: false,
        };

        stream::unfold(state, |mut state| async move {
            loop {
                if let Some(record) = state.pending.pop_front() {
                    return Some((record, state));
                }
                if state.finished {
                    return None;
                }
                state.advance().await;
            }
        })
        .boxed()
    }
}

struct State {
    source: Source,
    tracker: ToolCallTracker,
    watchdog: StallWatchdog,
    pending: VecDeque<NormalizedRecord>,
    /// Text of the immediately preceding record, if it was a text delta.
    last_text: Option<String>,
    events: usize,
    finished: bool,
}

impl State {
    /// Wait for the next event, waking every tick to consult the watchdog.
    async fn advance(&mut self) {
        let tick = self.watchdog.config().tick;
        match tokio::time::timeout(tick, self.source.next()).await {
            Err(_) => self.on_tick(),
            Ok(Some(Ok(event))) => self.on_event(event),
            Ok(Some(Err(e))) => {
                self.terminate(NormalizedRecord::error(ErrorKind::StreamFailure, e.to_string()))
            }
            Ok(None) => self.on_end(),
        }
    }

    fn on_tick(&mut self) {
        let now = Instant::now();
        if let Some(silent) = self.watchdog.abort_due(now) {
            self.terminate(NormalizedRecord::error(
                ErrorKind::Timeout,
                format!("no activity from the agent for {}s", silent.as_secs()),
            ));
            return;
        }
        let due = self.watchdog.check(now, self.tracker.executing_tool());
        for record in due {
            self.push(record);
        }
    }

    fn on_event(&mut self, event: Value) {
        if is_empty_event(&event) {
            debug!("Skipping empty event");
            return;
        }
        self.events += 1;
        let now = Instant::now();
        self.watchdog.observe_event(now);

        let kind = EventKind::classify(&event);
        if let EventKind::UpstreamError(message) = &kind {
            self.terminate(NormalizedRecord::error(ErrorKind::StreamFailure, message.clone()));
            return;
        }

        let mut emitted = false;
        if let Some(tool_event) = self.tracker.process_event(&kind) {
            self.push(NormalizedRecord::ToolEvent(tool_event));
            emitted = true;
        }

        if let Some(text) = extract_text(&event) {
            if self.last_text.as_deref() == Some(text.as_str()) {
                debug!("Dropping repeated text delta");
            } else {
                self.push(NormalizedRecord::TextDelta { text: text.clone() });
                self.last_text = Some(text);
                emitted = true;
            }
        }

        if emitted {
            self.watchdog.observe_output(now);
        } else {
            let due = self.watchdog.check(now, self.tracker.executing_tool());
            for record in due {
                self.push(record);
            }
        }
    }

    fn on_end(&mut self) {
        if let Some(tool) = self.tracker.in_flight_tool() {
            let message = format!("Stream ended while tool {tool} was still in flight");
            self.push(NormalizedRecord::warning(message));
        }
        if self.events == 0 {
            self.push(NormalizedRecord::warning("The agent produced no events"));
        }
        self.terminate(NormalizedRecord::Complete);
    }

    fn push(&mut self, record: NormalizedRecord) {
        if !matches!(record, NormalizedRecord::TextDelta { .. }) {
            self.last_text = None;
        }
        self.pending.push_back(record);
    }

    fn terminate(&mut self, record: NormalizedRecord) {
        info!(
            events = self.events,
            anomalies = self.tracker.anomalies(),
            terminal = ?record.to_wire().kind,
            "Event stream finished"
        );
        self.tracker.reset();
        self.pending.push_back(record);
        self.finished = true;
    }
}
