//! All configured tool servers behind one owner.
//!
//! The manager turns a [`ToolServersConfig`] into running
//! [`SubprocessToolHost`]s, reports their status, and exposes their tools
//! as ordinary [`Tool`]s. One server failing to start never affects the
//! others.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use relay_core::{BridgeConfig, HostConfig};
use relay_tool_runtime::tool::{Tool, ToolContext, ToolDefinition, ToolError, ToolResult};
use relay_tool_runtime::{BridgeState, ToolRegistry};

use crate::error::McpError;
use crate::host::SubprocessToolHost;
use crate::launch::{ToolServersConfig, TransportType};

/// Snapshot of one configured server.
#[derive(Debug, Clone, Serialize)]
pub struct ServerStatus {
    pub name: String,
    pub transport: TransportType,
    pub enabled: bool,
    /// `None` for servers that were never launched.
    pub state: Option<String>,
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Outcome of [`ToolServerManager::reload`].
#[derive(Debug, Clone, Serialize)]
pub struct ReloadSummary {
    pub success: bool,
    pub message: String,
    pub mcp_enabled: bool,
    pub server_count: usize,
    pub enabled_server_count: usize,
    pub started: usize,
    pub servers: Vec<ServerStatus>,
}

pub struct ToolServerManager {
    bridge_config: BridgeConfig,
    host_config: HostConfig,
    config: ToolServersConfig,
    hosts: BTreeMap<String, Arc<SubprocessToolHost>>,
    failures: BTreeMap<String, String>,
}

impl ToolServerManager {
    pub fn new(config: ToolServersConfig, bridge_config: BridgeConfig, host_config: HostConfig) -> Self {
        Self {
            bridge_config,
            host_config,
            config,
            hosts: BTreeMap::new(),
            failures: BTreeMap::new(),
        }
    }

    /// Discover the descriptor file (explicit `HostConfig` path first) and
    /// build a manager for it. Nothing is started yet.
    pub fn load(bridge_config: BridgeConfig, host_config: HostConfig) -> Result<Self, McpError> {
        let config = ToolServersConfig::discover(host_config.tool_servers_config.as_deref())?;
        Ok(Self::new(config, bridge_config, host_config))
    }

    pub fn config(&self) -> &ToolServersConfig {
        &self.config
    }

    pub fn host(&self, name: &str) -> Option<Arc<SubprocessToolHost>> {
        self.hosts.get(name).cloned()
    }

    /// Start every enabled stdio server concurrently. Returns how many came
    /// up; failures are logged and kept for [`status`](Self::status).
    pub fn start_all(&mut self) -> usize {
        let launchable: Vec<_> = self
            .config
            .launchable()
            .into_iter()
            .filter(|(name, _)| !self.hosts.contains_key(*name))
            .map(|(name, spec)| (name.to_string(), spec.clone()))
            .collect();
        if launchable.is_empty() {
            return 0;
        }

        let outcomes: Vec<_> = std::thread::scope(|scope| {
            let workers: Vec<_> = launchable
                .into_iter()
                .map(|(name, spec)| {
                    let host = SubprocessToolHost::new(
                        name.clone(),
                        self.bridge_config.clone(),
                        self.host_config.clone(),
                    );
                    let worker = scope.spawn(move || {
                        let outcome = host.start(&spec);
                        (host, outcome)
                    });
                    (name, worker)
                })
                .collect();
            workers
                .into_iter()
                .map(|(name, worker)| start_outcome(name, worker.join()))
                .collect()
        });

        let started = self.record_started(outcomes);
        info!(started, failed = self.failures.len(), "Tool servers started");
        started
    }

    fn record_started(&mut self, outcomes: Vec<StartOutcome>) -> usize {
        let mut started = 0;
        for (name, outcome) in outcomes {
            match outcome {
                Ok(host) => {
                    started += 1;
                    self.failures.remove(&name);
                    self.hosts.insert(name, Arc::new(host));
                }
                Err(error) => {
                    warn!(server = %name, error = %error, "Tool server failed to start");
                    self.failures.insert(name, error);
                }
            }
        }
        started
    }

    pub fn status(&self) -> Vec<ServerStatus> {
        self.config
            .servers
            .iter()
            .map(|entry| {
                let host = self.hosts.get(&entry.name);
                ServerStatus {
                    name: entry.name.clone(),
                    transport: entry.transport,
                    enabled: entry.enabled,
                    state: host.map(|h| h.state().to_string()),
                    pid: host.and_then(|h| h.process_id()),
                    error: self.failures.get(&entry.name).cloned(),
                }
            })
            .collect()
    }

    /// Tools per running server. A server that cannot answer in time is
    /// logged and left out.
    pub fn capabilities(&self, timeout: Duration) -> BTreeMap<String, Vec<ToolDefinition>> {
        let mut out = BTreeMap::new();
        for (name, host) in &self.hosts {
            match host.list_capabilities(timeout) {
                Ok(tools) => {
                    out.insert(name.clone(), tools);
                }
                Err(e) => warn!(server = %name, error = %e, "Could not list tools"),
            }
        }
        out
    }

    /// One [`HostedTool`] per advertised tool of every running server.
    pub fn hosted_tools(&self, list_timeout: Duration, call_timeout: Duration) -> Vec<HostedTool> {
        self.capabilities(list_timeout)
            .into_iter()
            .flat_map(|(server, tools)| {
                let host = self.hosts.get(&server).cloned();
                tools.into_iter().filter_map(move |definition| {
                    host.clone()
                        .map(|host| HostedTool::new(host, definition, call_timeout))
                })
            })
            .collect()
    }

    /// Register hosted tools into `registry`. Names already taken (by a
    /// local tool or an earlier server) are skipped. Returns the number
    /// registered.
    pub fn register_into(&self, registry: &mut ToolRegistry, call_timeout: Duration) -> usize {
        let mut registered = 0;
        for tool in self.hosted_tools(call_timeout, call_timeout) {
            let server = tool.server().to_string();
            match registry.register(tool) {
                Ok(()) => registered += 1,
                Err(e) => warn!(server = %server, error = %e, "Skipping hosted tool"),
            }
        }
        registered
    }

    /// Stop everything, switch to `config` and start it.
    pub fn reload(&mut self, config: ToolServersConfig) -> ReloadSummary {
        info!(servers = config.servers.len(), "Reloading tool server config");
        self.shutdown_all();
        self.failures.clear();
        self.config = config;

        let started = if self.config.enabled {
            self.start_all()
        } else {
            0
        };
        let failed = self.failures.len();

        ReloadSummary {
            success: failed == 0,
            message: if failed == 0 {
                format!("Reloaded tool server config, {started} server(s) running")
            } else {
                format!("Reloaded tool server config, {started} running, {failed} failed")
            },
            mcp_enabled: self.config.enabled,
            server_count: self.config.servers.len(),
            enabled_server_count: self.config.enabled_count(),
            started,
            servers: self.status(),
        }
    }

    /// Stop every host. Safe to call repeatedly.
    pub fn shutdown_all(&mut self) {
        for (name, host) in std::mem::take(&mut self.hosts) {
            let report = host.stop();
            if !report.worker_exited || !report.cleanup_completed {
                warn!(server = %name, ?report, "Tool server did not stop cleanly");
            }
        }
    }

    pub fn running(&self) -> usize {
        self.hosts
            .values()
            .filter(|h| h.state() == BridgeState::Running)
            .count()
    }
}

type StartOutcome = (String, Result<SubprocessToolHost, String>);

/// Fold a joined start thread into an outcome. A panicked thread counts as
/// a failed start.
fn start_outcome(
    name: String,
    joined: std::thread::Result<(SubprocessToolHost, Result<(), McpError>)>,
) -> StartOutcome {
    match joined {
        Ok((host, Ok(()))) => (name, Ok(host)),
        Ok((_, Err(e))) => (name, Err(e.to_string())),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            (name, Err(format!("start thread panicked: {reason}")))
        }
    }
}

impl Drop for ToolServerManager {
    fn drop(&mut self) {
        self.shutdown_all();
    }
}

/// A subprocess-backed tool usable wherever a local [`Tool`] is.
///
/// The blocking host call runs on tokio's blocking pool so async callers
/// never stall their runtime.
pub struct HostedTool {
    host: Arc<SubprocessToolHost>,
    definition: ToolDefinition,
    timeout: Duration,
}

impl HostedTool {
    pub fn new(host: Arc<SubprocessToolHost>, definition: ToolDefinition, timeout: Duration) -> Self {
        Self {
            host,
            definition,
            timeout,
        }
    }

    pub fn server(&self) -> &str {
        self.host.name()
    }
}

#[async_trait]
impl Tool for HostedTool {
    fn definition(&self) -> ToolDefinition {
        self.definition.clone()
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let host = Arc::clone(&self.host);
        let name = self.definition.name.clone();
        let timeout = self.timeout;
        tokio::task::spawn_blocking(move || host.invoke(&name, input, timeout))
            .await
            .map_err(|e| ToolError::ExecutionFailed(format!("hosted tool task failed: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(config: ToolServersConfig) -> ToolServerManager {
        ToolServerManager::new(config, BridgeConfig::default(), HostConfig::default())
    }

    #[test]
    fn test_disabled_config_starts_nothing() {
        let mut manager = manager(ToolServersConfig::disabled());
        assert_eq!(manager.start_all(), 0);
        assert!(manager.status().is_empty());
        assert!(manager.capabilities(Duration::from_secs(1)).is_empty());
    }

    #[test]
    fn test_failed_server_is_reported_not_fatal() {
        let config = ToolServersConfig::parse(
            r#"{"mcpServers": {
                "broken": {"command": "/nonexistent/relay-tool-server"},
                "remote": {"url": "https://tools.example.com/mcp"}
            }}"#,
        )
        .unwrap();
        let mut manager = manager(config);
        assert_eq!(manager.start_all(), 0);

        let status = manager.status();
        assert_eq!(status.len(), 2);
        let broken = status.iter().find(|s| s.name == "broken").unwrap();
        assert!(broken.error.as_deref().unwrap().contains("failed to launch"));
        assert!(broken.state.is_none());
        let remote = status.iter().find(|s| s.name == "remote").unwrap();
        assert_eq!(remote.transport, TransportType::StreamableHttp);
        assert!(remote.error.is_none());
    }

    #[test]
    fn test_panicked_start_is_reported_as_failure() {
        let config =
            ToolServersConfig::parse(r#"{"mcpServers": {"flaky": {"command": "flaky-server"}}}"#)
                .unwrap();
        let mut manager = manager(config);

        let joined: std::thread::Result<(SubprocessToolHost, Result<(), McpError>)> =
            Err(Box::new("bad launch spec"));
        let outcome = start_outcome("flaky".to_string(), joined);
        assert_eq!(manager.record_started(vec![outcome]), 0);

        let status = manager.status();
        assert_eq!(status.len(), 1);
        assert_eq!(
            status[0].error.as_deref(),
            Some("start thread panicked: bad launch spec")
        );
        assert!(status[0].state.is_none());
        assert_eq!(manager.running(), 0);
    }

    #[test]
    fn test_reload_to_disabled_reports_summary() {
        let mut manager = manager(ToolServersConfig::disabled());
        let summary = manager.reload(
            ToolServersConfig::parse(r#"{"enable_mcp": false, "servers": [{"name": "a", "enabled": true, "command": "x"}]}"#)
                .unwrap(),
        );
        assert!(summary.success);
        assert!(!summary.mcp_enabled);
        assert_eq!(summary.server_count, 1);
        assert_eq!(summary.enabled_server_count, 1);
        assert_eq!(summary.started, 0);
    }
}
