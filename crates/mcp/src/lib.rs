//! Tool servers hosted as subprocesses speaking MCP (JSON-RPC 2.0 over stdio).
//!
//! # Architecture
//!
//! - **types**: JSON-RPC 2.0 and MCP protocol types
//! - **transport**: line-delimited transports (stdio, duplex pipes, channels)
//! - **server**: MCP server wrapping a `ToolRegistry` (used by the fixture binary)
//! - **launch**: launch descriptors and the tool-server config file
//! - **connection**: one child process and its request/response routing
//! - **host**: blocking façade over a connection, one bridge worker each
//! - **manager**: every configured server, status, reload, `Tool` adapters
//! - **error**: unified error type
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use relay_core::{BridgeConfig, HostConfig};
//! use relay_mcp::{LaunchSpec, SubprocessToolHost};
//!
//! let host = SubprocessToolHost::new("files", BridgeConfig::default(), HostConfig::default());
//! host.start(&LaunchSpec::new("npx").with_args(["-y", "server-files"]))?;
//! for tool in host.list_capabilities(Duration::from_secs(10))? {
//!     println!("{tool}");
//! }
//! let result = host.invoke("read_file", serde_json::json!({"path": "README.md"}), Duration::from_secs(30));
//! println!("{}", result.content);
//! host.stop();
//! # Ok::<(), relay_mcp::McpError>(())
//! ```

pub mod connection;
pub mod error;
pub mod host;
pub mod launch;
pub mod manager;
pub mod server;
pub mod transport;
pub mod types;

pub use connection::ToolServerConnection;
pub use error::McpError;
pub use host::SubprocessToolHost;
pub use launch::{LaunchSpec, ServerEntry, ToolServersConfig, TransportType};
pub use manager::{HostedTool, ReloadSummary, ServerStatus, ToolServerManager};
pub use server::McpServer;
pub use transport::{ChannelTransport, LineTransport, McpTransport, StdioTransport};
pub use types::*;
