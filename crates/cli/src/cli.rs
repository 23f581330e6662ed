use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Host MCP tool servers and replay recorded agent streams.
///
/// Settings come from the environment (and `.env`); set `RELAY_PROFILE`
/// to read `{PROFILE}_{KEY}` overrides first.
#[derive(Parser, Debug)]
#[command(name = "relay", version, about = "Host MCP tool servers and replay agent streams")]
pub struct CliArgs {
    /// Tool-server config file (overrides TOOL_SERVERS_CONFIG and the default search)
    #[arg(long, global = true)]
    pub servers_config: Option<PathBuf>,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start every configured tool server and list its tools
    Servers {
        /// Seconds to wait for each server's tool list
        #[arg(long, default_value = "10")]
        timeout: u64,

        /// Print the status as JSON instead of a listing
        #[arg(long)]
        json: bool,
    },

    /// Invoke one tool on one configured server
    Call {
        /// Server name from the config file
        server: String,

        /// Tool name as advertised by the server
        tool: String,

        /// Tool arguments as a JSON object
        #[arg(long, default_value = "{}")]
        args: String,

        /// Seconds to wait for the result (default: BRIDGE_CALL_TIMEOUT_SECS)
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Classify a recorded event stream (one JSON event per line)
    Replay {
        /// JSONL file with raw agent events
        file: PathBuf,

        /// Delay between events in milliseconds, to exercise the watchdog
        #[arg(long, default_value = "0")]
        pace_millis: u64,

        /// Render records for humans instead of wire JSON lines
        #[arg(long)]
        pretty: bool,

        /// Print only the concatenated final answer
        #[arg(long, conflicts_with = "pretty")]
        answer: bool,
    },
}
