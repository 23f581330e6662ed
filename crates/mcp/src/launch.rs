//! Tool-server launch descriptors and the config file that lists them.
//!
//! Two file layouts are accepted:
//!
//! ```json
//! {"mcpServers": {"files": {"command": "npx", "args": ["-y", "server-files"], "env": {}}}}
//! ```
//!
//! and the older list form:
//!
//! ```json
//! {"enable_mcp": true, "default_timeout_seconds": 30,
//!  "servers": [{"name": "files", "enabled": true, "transport_type": "stdio",
//!               "command": "npx", "args": [], "env_vars": {}}]}
//! ```
//!
//! Only stdio servers can be hosted; remote (`url`) entries are kept in the
//! summary but never launched.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::McpError;

/// Default file name looked up in the working and config directories.
pub const CONFIG_FILE_NAME: &str = "mcp_config.json";

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How to start one tool-server subprocess.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchSpec {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<PathBuf>,
}

impl LaunchSpec {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            working_directory: None,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_working_directory(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_directory = Some(dir.into());
        self
    }

    /// Command with piped stdio, killed if its handle is ever dropped.
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.command);
        cmd.args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_directory {
            cmd.current_dir(dir);
        }
        cmd
    }
}

impl std::fmt::Display for LaunchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.command)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportType {
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportType {
    fn parse(raw: &str) -> Self {
        match raw {
            "stdio" => TransportType::Stdio,
            "sse" => TransportType::Sse,
            _ => TransportType::StreamableHttp,
        }
    }
}

/// One configured tool server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEntry {
    pub name: String,
    pub enabled: bool,
    pub transport: TransportType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub launch: Option<LaunchSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ServerEntry {
    /// The launch spec when this entry can be hosted as a subprocess.
    pub fn launchable(&self) -> Option<&LaunchSpec> {
        if !self.enabled {
            return None;
        }
        match (self.transport, &self.launch) {
            (TransportType::Stdio, Some(spec)) => Some(spec),
            (TransportType::Stdio, None) => {
                warn!(server = %self.name, "Stdio tool server has no command, skipping");
                None
            }
            (transport, _) => {
                warn!(
                    server = %self.name,
                    transport = ?transport,
                    url = ?self.url,
                    "Remote tool-server transports are not supported, skipping"
                );
                None
            }
        }
    }
}

/// Parsed tool-server config file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolServersConfig {
    pub enabled: bool,
    pub default_timeout: Duration,
    pub servers: Vec<ServerEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<PathBuf>,
}

impl Default for ToolServersConfig {
    fn default() -> Self {
        Self::disabled()
    }
}

// ── File formats ──────────────────────────────────────────────

#[derive(Deserialize)]
struct MapFile {
    #[serde(rename = "mcpServers", default)]
    mcp_servers: BTreeMap<String, MapServer>,
}

#[derive(Deserialize)]
struct MapServer {
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    working_directory: Option<String>,
    url: Option<String>,
    transport: Option<String>,
    #[serde(default)]
    disabled: bool,
}

#[derive(Deserialize)]
struct ListFile {
    #[serde(default)]
    enable_mcp: bool,
    #[serde(default = "default_timeout_secs")]
    default_timeout_seconds: u64,
    #[serde(default)]
    servers: Vec<ListServer>,
}

#[derive(Deserialize)]
struct ListServer {
    name: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default = "stdio_transport")]
    transport_type: String,
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    working_directory: Option<String>,
    #[serde(default, alias = "env")]
    env_vars: BTreeMap<String, String>,
    url: Option<String>,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn stdio_transport() -> String {
    "stdio".to_string()
}

fn launch_spec(
    command: Option<String>,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    working_directory: Option<String>,
) -> Option<LaunchSpec> {
    let command = command.filter(|c| !c.trim().is_empty())?;
    Some(LaunchSpec {
        command,
        args,
        env,
        working_directory: working_directory
            .filter(|d| !d.is_empty())
            .map(PathBuf::from),
    })
}

impl ToolServersConfig {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            servers: Vec::new(),
            source: None,
        }
    }

    /// Parse either file layout.
    pub fn parse(text: &str) -> Result<Self, McpError> {
        let raw: Value = serde_json::from_str(text)
            .map_err(|e| McpError::InvalidConfig(format!("not valid JSON: {e}")))?;
        if raw.get("mcpServers").is_some() {
            Self::from_map_format(raw)
        } else {
            Self::from_list_format(raw)
        }
    }

    fn from_map_format(raw: Value) -> Result<Self, McpError> {
        let file: MapFile =
            serde_json::from_value(raw).map_err(|e| McpError::InvalidConfig(e.to_string()))?;

        let servers: Vec<ServerEntry> = file
            .mcp_servers
            .into_iter()
            .map(|(name, server)| {
                let transport = if server.command.is_some() {
                    TransportType::Stdio
                } else {
                    TransportType::parse(server.transport.as_deref().unwrap_or("streamable_http"))
                };
                ServerEntry {
                    name,
                    enabled: !server.disabled,
                    transport,
                    launch: launch_spec(
                        server.command,
                        server.args,
                        server.env,
                        server.working_directory,
                    ),
                    url: server.url,
                }
            })
            .collect();

        debug!(count = servers.len(), "Parsed mcpServers config");
        Ok(Self {
            enabled: !servers.is_empty(),
            default_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            servers,
            source: None,
        })
    }

    fn from_list_format(raw: Value) -> Result<Self, McpError> {
        let file: ListFile =
            serde_json::from_value(raw).map_err(|e| McpError::InvalidConfig(e.to_string()))?;

        let servers = file
            .servers
            .into_iter()
            .map(|server| ServerEntry {
                name: server.name,
                enabled: server.enabled,
                transport: TransportType::parse(&server.transport_type),
                launch: launch_spec(
                    server.command,
                    server.args,
                    server.env_vars,
                    server.working_directory,
                ),
                url: server.url,
            })
            .collect();

        Ok(Self {
            enabled: file.enable_mcp,
            default_timeout: Duration::from_secs(file.default_timeout_seconds),
            servers,
            source: None,
        })
    }

    pub fn load(path: &Path) -> Result<Self, McpError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            McpError::InvalidConfig(format!("cannot read {}: {e}", path.display()))
        })?;
        let mut config = Self::parse(&text)?;
        config.source = Some(path.to_path_buf());
        info!(
            path = %path.display(),
            servers = config.servers.len(),
            enabled = config.enabled,
            "Loaded tool server config"
        );
        Ok(config)
    }

    /// Candidate files, most specific first.
    pub fn search_paths(explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(path) = explicit {
            paths.push(path.to_path_buf());
        }
        paths.push(PathBuf::from(CONFIG_FILE_NAME));
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("relay").join(CONFIG_FILE_NAME));
        }
        paths
    }

    /// Load the first config found. An explicit path must exist; with none
    /// found the result is an empty, disabled config.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, McpError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(McpError::InvalidConfig(format!(
                    "{} does not exist",
                    path.display()
                )));
            }
        }
        for candidate in Self::search_paths(explicit) {
            if candidate.is_file() {
                return Self::load(&candidate);
            }
            debug!(path = %candidate.display(), "No tool server config here");
        }
        info!("No tool server config found, tool servers disabled");
        Ok(Self::disabled())
    }

    /// Enabled stdio servers, in file order.
    pub fn launchable(&self) -> Vec<(&str, &LaunchSpec)> {
        if !self.enabled {
            return Vec::new();
        }
        self.servers
            .iter()
            .filter_map(|s| s.launchable().map(|spec| (s.name.as_str(), spec)))
            .collect()
    }

    pub fn enabled_count(&self) -> usize {
        self.servers.iter().filter(|s| s.enabled).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_map_format() {
        let config = ToolServersConfig::parse(
            r#"{"mcpServers": {
                "files": {"command": "npx", "args": ["-y", "server-files"], "env": {"ROOT": "/tmp"}, "working_directory": ""},
                "remote": {"url": "https://tools.example.com/mcp", "transport": "sse"},
                "off": {"command": "true", "disabled": true}
            }}"#,
        )
        .unwrap();

        assert!(config.enabled);
        assert_eq!(config.servers.len(), 3);
        assert_eq!(config.enabled_count(), 2);

        let launchable = config.launchable();
        assert_eq!(launchable.len(), 1);
        let (name, spec) = launchable[0];
        assert_eq!(name, "files");
        assert_eq!(spec.args, vec!["-y", "server-files"]);
        assert_eq!(spec.env.get("ROOT").map(String::as_str), Some("/tmp"));
        assert!(spec.working_directory.is_none());

        let remote = config.servers.iter().find(|s| s.name == "remote").unwrap();
        assert_eq!(remote.transport, TransportType::Sse);
    }

    #[test]
    fn test_list_format() {
        let config = ToolServersConfig::parse(
            r#"{"enable_mcp": true, "default_timeout_seconds": 12, "servers": [
                {"name": "a", "enabled": true, "transport_type": "stdio", "command": "srv-a", "env_vars": {"K": "V"}},
                {"name": "b", "enabled": false, "command": "srv-b"},
                {"name": "c", "enabled": true, "transport_type": "streamable_http", "url": "http://localhost:9000"}
            ]}"#,
        )
        .unwrap();

        assert_eq!(config.default_timeout, Duration::from_secs(12));
        let names: Vec<_> = config.launchable().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["a"]);
    }

    #[test]
    fn test_disabled_list_launches_nothing() {
        let config = ToolServersConfig::parse(
            r#"{"enable_mcp": false, "servers": [{"name": "a", "enabled": true, "command": "srv"}]}"#,
        )
        .unwrap();
        assert!(config.launchable().is_empty());
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        assert!(matches!(
            ToolServersConfig::parse("{not json"),
            Err(McpError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_discover_explicit_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"mcpServers": {{"echo": {{"command": "relay-echo-server"}}}}}}"#).unwrap();

        let config = ToolServersConfig::discover(Some(file.path())).unwrap();
        assert_eq!(config.source.as_deref(), Some(file.path()));
        assert_eq!(config.launchable()[0].1.command, "relay-echo-server");
    }

    #[test]
    fn test_discover_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("absent.json");
        assert!(ToolServersConfig::discover(Some(&missing)).is_err());
    }

    #[test]
    fn test_launch_spec_display() {
        let spec = LaunchSpec::new("python").with_args(["-m", "server"]);
        assert_eq!(spec.to_string(), "python -m server");
    }
}
