use crate::agent::{AgentError, StreamingAgent};
use crate::classifier::StreamEventClassifier;
use crate::record::{NormalizedRecord, WireRecord};
use futures::stream::{self, BoxStream, StreamExt};
use relay_core::WatchdogConfig;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// One request/response exchange with an agent, delivered as records.
pub struct StreamingSession {
    id: Uuid,
    classifier: StreamEventClassifier,
}

impl StreamingSession {
    pub fn new(config: WatchdogConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            classifier: StreamEventClassifier::new(config),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Ask `agent` and stream back normalized records. Never fails: an agent
    /// that cannot start streaming yields a single `Error` record.
    pub async fn run(
        &self,
        agent: &dyn StreamingAgent,
        message: &str,
    ) -> BoxStream<'static, NormalizedRecord> {
        info!(session = %self.id, agent = agent.agent_name(), "Starting streaming session");
        match agent.stream(message).await {
            Ok(source) => self.classifier.classify_stream(source),
            Err(e) => {
                warn!(session = %self.id, error = %e, "Agent failed to start streaming");
                let record = NormalizedRecord::error(e.kind(), e.to_string());
                stream::once(async move { record }).boxed()
            }
        }
    }

    /// Same as [`run`](Self::run), rendered as caller-facing wire records.
    pub async fn run_wire(
        &self,
        agent: &dyn StreamingAgent,
        message: &str,
    ) -> BoxStream<'static, WireRecord> {
        self.run(agent, message)
            .await
            .map(|record| record.to_wire())
            .boxed()
    }

    /// Quick non-streaming round trip to check the agent responds at all.
    pub async fn probe(&self, agent: &dyn StreamingAgent, timeout: Duration) -> Result<String, AgentError> {
        match tokio::time::timeout(timeout, agent.respond("Reply briefly: hello")).await {
            Ok(Ok(answer)) => {
                info!(session = %self.id, chars = answer.len(), "Agent probe succeeded");
                Ok(answer)
            }
            Ok(Err(e)) => {
                warn!(session = %self.id, error = %e, "Agent probe failed");
                Err(e)
            }
            Err(_) => Err(AgentError::Unavailable(format!(
                "no answer within {timeout:?}"
            ))),
        }
    }
}
