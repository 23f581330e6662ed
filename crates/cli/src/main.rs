mod cli;
mod replay;
mod terminal;

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use futures::StreamExt;
use tracing::{error, info};

use relay_core::config::{load_dotenv, Config};
use relay_mcp::{SubprocessToolHost, ToolServerManager};
use relay_tool_runtime::agent::StreamingAgent;
use relay_tool_runtime::StreamingSession;

use crate::cli::{CliArgs, Command};
use crate::replay::ReplayAgent;
use crate::terminal::Terminal;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries records and listings, logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    load_dotenv();
    let args = CliArgs::parse();
    let mut config = Config::from_env();
    if let Some(path) = args.servers_config {
        config.host.tool_servers_config = Some(path);
    }
    config.log_summary();

    let terminal = Terminal::new(!args.no_color);

    match args.command {
        Command::Servers { timeout, json } => {
            tokio::task::spawn_blocking(move || {
                list_servers(&config, &terminal, Duration::from_secs(timeout), json)
            })
            .await?
        }
        Command::Call {
            server,
            tool,
            args,
            timeout,
        } => {
            let arguments: serde_json::Value =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            if !arguments.is_object() {
                bail!("--args must be a JSON object, got {arguments}");
            }
            let timeout = timeout
                .map(Duration::from_secs)
                .unwrap_or(config.bridge.call_timeout);

            let succeeded = tokio::task::spawn_blocking(move || {
                call_tool(&config, &terminal, &server, &tool, arguments, timeout)
            })
            .await??;
            if !succeeded {
                std::process::exit(1);
            }
            Ok(())
        }
        Command::Replay {
            file,
            pace_millis,
            pretty,
            answer,
        } => {
            let agent = ReplayAgent::from_path(&file, Some(Duration::from_millis(pace_millis)))?;
            info!(events = agent.len(), agent = agent.agent_name(), "Replaying recording");

            if answer {
                println!("{}", agent.respond("").await?);
                return Ok(());
            }

            let session = StreamingSession::new(config.watchdog.clone());
            let mut records = session.run(&agent, "").await;
            while let Some(record) = records.next().await {
                if pretty {
                    terminal.display_record(&record)?;
                } else {
                    println!("{}", record.to_wire().to_json());
                }
            }
            Ok(())
        }
    }
}

fn list_servers(config: &Config, terminal: &Terminal, timeout: Duration, json: bool) -> Result<()> {
    let mut manager = ToolServerManager::load(config.bridge.clone(), config.host.clone())
        .context("failed to load tool server config")?;

    if !manager.config().enabled {
        terminal.print_info("Tool servers are disabled (no config found, or enable_mcp is false)")?;
        return Ok(());
    }
    if let Some(source) = &manager.config().source {
        terminal.print_info(&format!("Config: {}", source.display()))?;
    }

    manager.start_all();
    let capabilities = manager.capabilities(timeout);
    let status = manager.status();

    if json {
        let listing: Vec<_> = status
            .iter()
            .map(|s| {
                serde_json::json!({
                    "server": s,
                    "tools": capabilities.get(&s.name).cloned().unwrap_or_default(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for server in &status {
            terminal.print_server(server, capabilities.get(&server.name))?;
        }
    }

    manager.shutdown_all();
    Ok(())
}

/// Returns whether the tool call succeeded.
fn call_tool(
    config: &Config,
    terminal: &Terminal,
    server: &str,
    tool: &str,
    arguments: serde_json::Value,
    timeout: Duration,
) -> Result<bool> {
    let manager = ToolServerManager::load(config.bridge.clone(), config.host.clone())
        .context("failed to load tool server config")?;

    let entry = manager
        .config()
        .servers
        .iter()
        .find(|s| s.name == server)
        .with_context(|| format!("no tool server named '{server}' in the config"))?;
    let spec = entry
        .launchable()
        .with_context(|| format!("tool server '{server}' is disabled or not a stdio server"))?;

    let host = SubprocessToolHost::new(server, config.bridge.clone(), config.host.clone());
    if let Err(e) = host.start(spec) {
        error!(server = %server, error = %e, "Tool server did not start");
        terminal.print_error(&e.to_string())?;
        return Ok(false);
    }

    let result = host.invoke(tool, arguments, timeout);
    host.stop();
    terminal.print_tool_result(tool, &result)?;
    Ok(!result.is_error)
}
