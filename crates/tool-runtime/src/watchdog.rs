use crate::record::NormalizedRecord;
use relay_core::WatchdogConfig;
use std::time::Duration;
use tokio::time::Instant;

/// Timing policy for stalled tools and silent upstreams.
///
/// Holds no clock of its own: callers pass `now`, so the classifier can drive
/// it from tokio's (pausable) clock.
#[derive(Debug)]
pub struct StallWatchdog {
    config: WatchdogConfig,
    last_event: Instant,
    last_output: Instant,
    last_progress: Option<Instant>,
    stall_warned: bool,
    idle_advised: bool,
}

impl StallWatchdog {
    pub fn new(config: WatchdogConfig, now: Instant) -> Self {
        Self {
            config,
            last_event: now,
            last_output: now,
            last_progress: None,
            stall_warned: false,
            idle_advised: false,
        }
    }

    pub fn config(&self) -> &WatchdogConfig {
        &self.config
    }

    /// Any event arrived from upstream.
    pub fn observe_event(&mut self, now: Instant) {
        self.last_event = now;
        self.idle_advised = false;
    }

    /// A text or tool record was emitted; ends the current stall.
    pub fn observe_output(&mut self, now: Instant) {
        self.last_output = now;
        self.last_progress = None;
        self.stall_warned = false;
    }

    /// Records due at `now`. `executing` names the tool in flight, if any.
    pub fn check(&mut self, now: Instant, executing: Option<&str>) -> Vec<NormalizedRecord> {
        let mut due = Vec::new();

        match executing {
            Some(tool) => {
                let stalled = now.saturating_duration_since(self.last_output);
                let since_progress = self
                    .last_progress
                    .map(|at| now.saturating_duration_since(at))
                    .unwrap_or(stalled);

                if stalled >= self.config.progress_interval
                    && since_progress >= self.config.progress_interval
                {
                    due.push(NormalizedRecord::info(format!(
                        "Tool {tool} is still running ({}s elapsed)",
                        stalled.as_secs()
                    )));
                    self.last_progress = Some(now);
                }

                if stalled >= self.config.stall_warning_after && !self.stall_warned {
                    due.push(NormalizedRecord::warning(format!(
                        "Tool {tool} has produced no output for {}s and may be stuck",
                        stalled.as_secs()
                    )));
                    self.stall_warned = true;
                }
            }
            None => {
                let idle = now.saturating_duration_since(self.last_event);
                if idle >= self.config.idle_advisory_after && !self.idle_advised {
                    due.push(NormalizedRecord::info(format!(
                        "No response from the agent for {}s, still waiting",
                        idle.as_secs()
                    )));
                    self.idle_advised = true;
                }
            }
        }

        due
    }

    /// How long the session has been silent, when that exceeds the opt-in
    /// abort bound.
    pub fn abort_due(&self, now: Instant) -> Option<Duration> {
        let bound = self.config.abort_after?;
        let silent = now.saturating_duration_since(self.last_event.max(self.last_output));
        (silent >= bound).then_some(silent)
    }
}
