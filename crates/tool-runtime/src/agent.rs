use async_trait::async_trait;
use futures::Stream;
use relay_core::ErrorKind;
use serde_json::Value;
use std::pin::Pin;

/// Forward-only stream of raw agent events.
pub type EventStream = Pin<Box<dyn Stream<Item = Result<Value, AgentError>> + Send>>;

/// Boundary to a language-model agent that may call tools while it answers.
///
/// The agent's reasoning and the model provider's wire format live behind
/// this trait; the runtime only sees loosely-typed JSON events.
#[async_trait]
pub trait StreamingAgent: Send + Sync {
    /// Start answering `message`, yielding raw events as they are produced.
    async fn stream(&self, message: &str) -> Result<EventStream, AgentError>;

    /// Non-streaming answer. Also serves as a health probe.
    async fn respond(&self, message: &str) -> Result<String, AgentError> {
        use futures::StreamExt;
        let mut events = self.stream(message).await?;
        let mut answer = String::new();
        while let Some(event) = events.next().await {
            if let Some(text) = crate::stream::extract_text(&event?) {
                answer.push_str(&text);
            }
        }
        Ok(answer)
    }

    /// Agent name for logging/debugging.
    fn agent_name(&self) -> &str;
}

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Agent unavailable: {0}")]
    Unavailable(String),
    #[error("Stream error: {0}")]
    Stream(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AgentError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AgentError::Unavailable(_) => ErrorKind::Initialization,
            AgentError::Stream(_) | AgentError::Other(_) => ErrorKind::StreamFailure,
        }
    }
}

/// Scripted agent for exercising sessions without a model backend.
#[cfg(any(test, feature = "test-utils"))]
pub mod mock {
    use super::*;
    use futures::stream;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug)]
    pub enum Step {
        Event(Value),
        Fail(String),
        Delay(Duration),
    }

    /// Replays queued scripts, one per `stream` call, oldest first.
    pub struct ScriptedAgent {
        scripts: Mutex<VecDeque<Vec<Step>>>,
    }

    impl ScriptedAgent {
        pub fn new() -> Self {
            Self {
                scripts: Mutex::new(VecDeque::new()),
            }
        }

        pub fn with_events(events: Vec<Value>) -> Self {
            let agent = Self::new();
            agent.queue(events.into_iter().map(Step::Event).collect());
            agent
        }

        pub fn queue(&self, steps: Vec<Step>) {
            self.scripts.lock().unwrap().push_back(steps);
        }
    }

    impl Default for ScriptedAgent {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl StreamingAgent for ScriptedAgent {
        async fn stream(&self, _message: &str) -> Result<EventStream, AgentError> {
            let steps = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| AgentError::Unavailable("no script queued".to_string()))?;

            let events = stream::unfold(steps.into_iter(), |mut steps| async move {
                loop {
                    match steps.next()? {
                        Step::Delay(d) => tokio::time::sleep(d).await,
                        Step::Event(v) => return Some((Ok(v), steps)),
                        Step::Fail(msg) => return Some((Err(AgentError::Stream(msg)), steps)),
                    }
                }
            });
            Ok(Box::pin(events))
        }

        fn agent_name(&self) -> &str {
            "scripted"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{ScriptedAgent, Step};
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_respond_concatenates_text() {
        let agent = ScriptedAgent::with_events(vec![
            json!({"init_event_loop": true}),
            json!({"data": "Hello, "}),
            json!({"tool_call_start": "calc"}),
            json!({"data": "world"}),
        ]);
        assert_eq!(agent.respond("hi").await.unwrap(), "Hello, world");
    }

    #[tokio::test]
    async fn test_respond_surfaces_stream_failure() {
        let agent = ScriptedAgent::new();
        agent.queue(vec![
            Step::Event(json!({"data": "partial"})),
            Step::Fail("connection reset".into()),
        ]);
        let err = agent.respond("hi").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StreamFailure);
    }

    #[tokio::test]
    async fn test_unscripted_stream_is_unavailable() {
        let agent = ScriptedAgent::new();
        assert!(matches!(
            agent.stream("hi").await,
            Err(AgentError::Unavailable(_))
        ));
    }
}
