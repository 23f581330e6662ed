//! Agent that replays a recorded event stream.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::stream;
use serde_json::Value;
use tracing::debug;

use relay_tool_runtime::agent::{AgentError, EventStream, StreamingAgent};

/// Yields the same recorded events for every message it is asked.
pub struct ReplayAgent {
    name: String,
    events: Vec<Value>,
    pace: Option<Duration>,
}

impl ReplayAgent {
    pub fn from_path(path: &Path, pace: Option<Duration>) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let mut agent = Self::from_jsonl(&text, pace)
            .with_context(|| format!("invalid event recording {}", path.display()))?;
        agent.name = format!("replay:{}", path.display());
        Ok(agent)
    }

    /// One JSON value per line; blank lines are skipped.
    pub fn from_jsonl(text: &str, pace: Option<Duration>) -> Result<Self> {
        let events = text
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(n, line)| {
                serde_json::from_str(line).with_context(|| format!("line {} is not JSON", n + 1))
            })
            .collect::<Result<Vec<Value>>>()?;
        debug!(events = events.len(), "Loaded event recording");

        Ok(Self {
            name: "replay".to_string(),
            events,
            pace: pace.filter(|d| !d.is_zero()),
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }
}

#[async_trait]
impl StreamingAgent for ReplayAgent {
    async fn stream(&self, _message: &str) -> Result<EventStream, AgentError> {
        let pace = self.pace;
        let events = stream::unfold(self.events.clone().into_iter(), move |mut events| async move {
            let event = events.next()?;
            if let Some(pace) = pace {
                tokio::time::sleep(pace).await;
            }
            Some((Ok(event), events))
        });
        Ok(Box::pin(events))
    }

    fn agent_name(&self) -> &str {
        &self.name
    }
}
