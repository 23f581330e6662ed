use anyhow::Result;
use crossterm::{
    execute,
    style::{Color, Print, ResetColor, SetForegroundColor},
};
use std::io::{self, Write};

use relay_mcp::ServerStatus;
use relay_tool_runtime::{NormalizedRecord, ProgressLevel, ToolDefinition, ToolResult};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const TOOL_CALL: Color = Color::Yellow;
    const TOOL_RESULT: Color = Color::DarkGreen;
    const WARNING: Color = Color::Yellow;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Human-facing output on stdout.
pub struct Terminal {
    color: bool,
}

impl Terminal {
    pub fn new(color: bool) -> Self {
        Self { color }
    }

    fn print(&self, color: Color, text: &str) -> Result<()> {
        let mut stdout = io::stdout();
        if self.color {
            execute!(stdout, SetForegroundColor(color), Print(text), ResetColor)?;
        } else {
            execute!(stdout, Print(text))?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_info(&self, message: &str) -> Result<()> {
        self.print(Colors::DIM, &format!("{message}\n"))
    }

    pub fn print_error(&self, message: &str) -> Result<()> {
        self.print(Colors::ERROR, &format!("error: {message}\n"))
    }

    /// One configured server with its tools (if it is running).
    pub fn print_server(&self, status: &ServerStatus, tools: Option<&Vec<ToolDefinition>>) -> Result<()> {
        let state = status.state.as_deref().unwrap_or(if status.enabled {
            "not started"
        } else {
            "disabled"
        });
        self.print(Colors::HEADER, &status.name)?;
        let pid = status.pid.map(|p| format!(", pid {p}")).unwrap_or_default();
        self.print(Colors::DIM, &format!(" ({:?}, {state}{pid})\n", status.transport))?;

        if let Some(error) = &status.error {
            self.print(Colors::ERROR, &format!("  {error}\n"))?;
        }
        for tool in tools.into_iter().flatten() {
            self.print(Colors::TOOL_CALL, &format!("  {}", tool.name))?;
            if !tool.description.is_empty() {
                self.print(Colors::DIM, &format!(" - {}", tool.description))?;
            }
            self.print(Colors::DIM, "\n")?;
        }
        Ok(())
    }

    pub fn print_tool_result(&self, tool: &str, result: &ToolResult) -> Result<()> {
        let (color, label) = match (result.is_error, result.error_kind) {
            (false, _) => (Colors::TOOL_RESULT, "result".to_string()),
            (true, Some(kind)) => (Colors::ERROR, format!("error ({kind})")),
            (true, None) => (Colors::ERROR, "error".to_string()),
        };
        self.print(color, &format!("[{tool} {label}]\n"))?;
        self.print(Colors::ASSISTANT_TEXT, &format!("{}\n", result.content))
    }

    /// Render one session record the way a chat front-end would.
    pub fn display_record(&self, record: &NormalizedRecord) -> Result<()> {
        match record {
            NormalizedRecord::TextDelta { text } => self.print(Colors::ASSISTANT_TEXT, text),
            NormalizedRecord::ToolEvent(event) => {
                self.print(Colors::TOOL_CALL, &format!("\n[{event}]\n"))
            }
            NormalizedRecord::Progress { level, message } => {
                let color = match level {
                    ProgressLevel::Info => Colors::DIM,
                    ProgressLevel::Warning => Colors::WARNING,
                };
                self.print(color, &format!("\n({message})\n"))
            }
            NormalizedRecord::Error { kind, message } => {
                self.print(Colors::ERROR, &format!("\n[error: {kind}: {message}]\n"))
            }
            NormalizedRecord::Complete => self.print(Colors::DIM, "\n---\n"),
        }
    }
}
