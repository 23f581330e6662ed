//! relay-echo-server: minimal MCP tool server over stdio.
//!
//! Serves `echo`, `sleep` and `fail`. Used by the integration tests and
//! handy for trying `relay servers` / `relay call` by hand.
//!
//! ```bash
//! relay-echo-server --page-size 1
//! RUST_LOG=debug relay-echo-server
//! ```

use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use serde_json::Value;

use relay_mcp::server::McpServer;
use relay_mcp::transport::StdioTransport;
use relay_tool_runtime::tool::{EchoTool, Tool, ToolContext, ToolDefinition, ToolError, ToolResult};
use relay_tool_runtime::ToolRegistry;

/// Minimal MCP tool server speaking newline-delimited JSON-RPC on stdio.
#[derive(Parser, Debug)]
#[command(name = "relay-echo-server", version, about)]
struct Cli {
    /// Server name reported in the initialize response.
    #[arg(long, default_value = "relay-echo-server")]
    name: String,

    /// Tools per tools/list page (0 = everything in one page).
    #[arg(long, env = "RELAY_ECHO_PAGE_SIZE", default_value_t = 0)]
    page_size: usize,

    /// Keep running after SIGTERM and after stdin closes, so only a forced
    /// kill ends the process.
    #[arg(long)]
    ignore_sigterm: bool,
}

struct SleepTool;

#[async_trait]
impl Tool for SleepTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "sleep".to_string(),
            description: "Waits for the given number of milliseconds, then answers.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "millis": { "type": "integer", "minimum": 0 }
                },
                "required": ["millis"]
            }),
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let millis = input
            .get("millis")
            .and_then(Value::as_u64)
            .ok_or_else(|| ToolError::InvalidInput("'millis' must be a non-negative integer".into()))?;
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(ToolResult::success("", format!("slept {millis}ms")))
    }
}

struct FailTool;

#[async_trait]
impl Tool for FailTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "fail".to_string(),
            description: "Always fails with the given reason.".to_string(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": { "reason": { "type": "string" } }
            }),
        }
    }

    async fn execute(&self, input: Value, _context: &ToolContext) -> Result<ToolResult, ToolError> {
        let reason = input
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("requested failure");
        Err(ToolError::ExecutionFailed(reason.to_string()))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    tracing::info!(?cli, "starting relay-echo-server");

    if cli.ignore_sigterm {
        ignore_sigterm()?;
    }

    let mut registry = ToolRegistry::new();
    registry.register(EchoTool)?;
    registry.register(SleepTool)?;
    registry.register(FailTool)?;

    let mut server = McpServer::new(registry).with_name(cli.name);
    if cli.page_size > 0 {
        server = server.with_page_size(cli.page_size);
    }

    let mut transport = StdioTransport::stdio();
    server.run(&mut transport).await?;

    if cli.ignore_sigterm {
        tracing::info!("stdin closed, waiting to be killed");
        std::future::pending::<()>().await;
    }
    Ok(())
}

#[cfg(unix)]
fn ignore_sigterm() -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn(async move {
        while sigterm.recv().await.is_some() {
            tracing::info!("SIGTERM received, ignoring");
        }
    });
    Ok(())
}

#[cfg(not(unix))]
fn ignore_sigterm() -> anyhow::Result<()> {
    Ok(())
}
