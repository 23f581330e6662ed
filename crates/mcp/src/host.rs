//! Blocking façade over one tool-server subprocess.
//!
//! Each host owns a [`BridgeHandle`]; the child process, its stdio tasks and
//! every request to it live on that bridge's worker. Callers on any thread
//! use the synchronous methods below with an explicit timeout.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use relay_core::{BridgeConfig, ErrorKind, HostConfig};
use relay_tool_runtime::{BridgeHandle, BridgeState, StopReport, ToolDefinition, ToolResult};

use crate::connection::ToolServerConnection;
use crate::error::McpError;
use crate::launch::LaunchSpec;

pub struct SubprocessToolHost {
    name: String,
    bridge: BridgeHandle,
    config: HostConfig,
    /// Held across the whole of `start` and `stop`, so a stop never lands
    /// between bridge readiness and cleanup-hook registration.
    lifecycle: Mutex<()>,
    connection: Mutex<Option<Arc<ToolServerConnection>>>,
}

impl SubprocessToolHost {
    pub fn new(name: impl Into<String>, bridge_config: BridgeConfig, config: HostConfig) -> Self {
        let name = name.into();
        Self {
            bridge: BridgeHandle::new(name.clone(), bridge_config),
            name,
            config,
            lifecycle: Mutex::new(()),
            connection: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> BridgeState {
        self.bridge.state()
    }

    pub fn process_id(&self) -> Option<u32> {
        self.connection().and_then(|conn| conn.process_id())
    }

    fn connection(&self) -> Option<Arc<ToolServerConnection>> {
        lock(&self.connection).clone()
    }

    /// Launch the server and complete the handshake. On failure the process
    /// has already been terminated and the host is `Failed`.
    pub fn start(&self, spec: &LaunchSpec) -> Result<(), McpError> {
        let _lifecycle = lock(&self.lifecycle);
        let name = self.name.clone();
        let spec = spec.clone();
        let handshake = self.config.handshake_timeout;
        let grace = self.config.terminate_grace;

        let conn = self.bridge.start_with(move || async move {
            ToolServerConnection::launch(&name, &spec, handshake, grace)
                .await
                .map(Arc::new)
                .map_err(|e| match e {
                    McpError::ServerUnavailable(msg) => msg,
                    other => other.to_string(),
                })
        })?;

        let hook_conn = Arc::clone(&conn);
        self.bridge
            .set_cleanup_hook(move || async move { hook_conn.shutdown(grace).await });
        *lock(&self.connection) = Some(conn);
        Ok(())
    }

    /// Tools the server advertises. Empty when the host is not running.
    pub fn list_capabilities(&self, timeout: Duration) -> Result<Vec<ToolDefinition>, McpError> {
        let Some(conn) = self.running_connection() else {
            debug!(server = %self.name, state = %self.state(), "Capabilities requested from idle host");
            return Ok(Vec::new());
        };
        self.bridge
            .call(async move { conn.list_tools().await }, timeout)
    }

    /// Invoke one tool. Every failure is reported inside the returned
    /// `ToolResult`.
    pub fn invoke(&self, tool: &str, arguments: Value, timeout: Duration) -> ToolResult {
        let call_id = format!("call_{}", uuid::Uuid::new_v4().simple());

        let Some(conn) = self.running_connection() else {
            return ToolResult::failure(
                call_id,
                ErrorKind::ToolServerUnavailable,
                format!("tool server '{}' is not running ({})", self.name, self.state()),
            );
        };

        let tool_name = tool.to_string();
        let outcome = self
            .bridge
            .call(async move { conn.call_tool(&tool_name, arguments).await }, timeout);

        match outcome {
            Ok(result) if result.is_error => {
                debug!(server = %self.name, tool = %tool, "Tool reported an error");
                ToolResult {
                    tool_call_id: call_id,
                    content: result.text(),
                    is_error: true,
                    error_kind: None,
                }
            }
            Ok(result) => ToolResult::success(call_id, result.text()),
            Err(e) => {
                warn!(server = %self.name, tool = %tool, error = %e, "Tool invocation failed");
                ToolResult::failure(call_id, e.kind(), e.to_string())
            }
        }
    }

    fn running_connection(&self) -> Option<Arc<ToolServerConnection>> {
        if self.state() != BridgeState::Running {
            return None;
        }
        self.connection()
    }

    /// Terminate the server and stop the worker. Idempotent.
    pub fn stop(&self) -> StopReport {
        let _lifecycle = lock(&self.lifecycle);
        let report = self.bridge.stop(self.bridge.config().stop_timeout);
        if lock(&self.connection).take().is_some() {
            info!(server = %self.name, clean = report.cleanup_completed, "Tool server host stopped");
        }
        report
    }
}

impl std::fmt::Debug for SubprocessToolHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubprocessToolHost")
            .field("name", &self.name)
            .field("state", &self.state())
            .field("pid", &self.process_id())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> SubprocessToolHost {
        let bridge = BridgeConfig {
            start_timeout: Duration::from_secs(10),
            stop_timeout: Duration::from_secs(2),
            call_timeout: Duration::from_secs(2),
            cleanup_timeout: Duration::from_secs(5),
        };
        let config = HostConfig {
            handshake_timeout: Duration::from_secs(2),
            terminate_grace: Duration::from_millis(500),
            tool_servers_config: None,
        };
        SubprocessToolHost::new(name, bridge, config)
    }

    #[test]
    fn test_idle_host_has_no_capabilities() {
        let host = host("idle");
        assert_eq!(host.state(), BridgeState::Unstarted);
        assert!(host.list_capabilities(Duration::from_secs(1)).unwrap().is_empty());
        assert!(host.process_id().is_none());

        let result = host.invoke("echo", serde_json::json!({}), Duration::from_secs(1));
        assert!(result.is_error);
        assert_eq!(result.error_kind, Some(ErrorKind::ToolServerUnavailable));
    }

    #[test]
    fn test_missing_executable_is_unavailable() {
        let host = host("missing");
        let err = host
            .start(&LaunchSpec::new("/nonexistent/relay-tool-server"))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ToolServerUnavailable);
        assert!(err.to_string().contains("failed to launch"));
        assert_eq!(host.state(), BridgeState::Failed);

        host.stop();
        assert_eq!(host.state(), BridgeState::Stopped);
    }

    #[cfg(unix)]
    #[test]
    fn test_immediate_exit_reports_status() {
        let host = host("exits");
        let err = host
            .start(&LaunchSpec::new("sh").with_args(["-c", "exit 3"]))
            .unwrap_err();
        assert!(matches!(err, McpError::ServerUnavailable(_)));
        assert!(err.to_string().contains("exit status: 3"), "{err}");
        assert!(host.list_capabilities(Duration::from_secs(1)).unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_silent_server_times_out_handshake() {
        let host = host("silent");
        let started = std::time::Instant::now();
        let err = host
            .start(&LaunchSpec::new("sleep").with_args(["30"]))
            .unwrap_err();
        assert!(err.to_string().contains("did not answer initialize"), "{err}");
        assert!(started.elapsed() < Duration::from_secs(8));
        assert_eq!(host.state(), BridgeState::Failed);
    }
}
