//! MCP server implementation.
//!
//! Serves a `ToolRegistry` over any [`McpTransport`]. The `relay-echo-server`
//! binary uses it to stand in for a real tool server.

use serde::Serialize;
use serde_json::Value;
use std::path::PathBuf;

use relay_tool_runtime::tool::ToolContext;
use relay_tool_runtime::ToolRegistry;

use crate::error::McpError;
use crate::transport::McpTransport;
use crate::types::*;

pub struct McpServer {
    registry: ToolRegistry,
    server_name: String,
    server_version: String,
    initialized: bool,
    working_directory: PathBuf,
    /// Tools per `tools/list` page; `None` lists everything at once.
    page_size: Option<usize>,
}

impl McpServer {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            server_name: "relay-mcp".to_string(),
            server_version: env!("CARGO_PKG_VERSION").to_string(),
            initialized: false,
            working_directory: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")),
            page_size: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    pub fn with_working_directory(mut self, dir: PathBuf) -> Self {
        self.working_directory = dir;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size.max(1));
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Serve requests until the transport closes.
    pub async fn run<T: McpTransport>(&mut self, transport: &mut T) -> Result<(), McpError> {
        tracing::info!(server = %self.server_name, tools = self.registry.len(), "MCP server starting");

        while let Some(line) = transport.receive().await? {
            tracing::debug!(message = %line, "Received message");

            let response = match IncomingMessage::parse(&line) {
                Ok(IncomingMessage::Request(request)) => self.handle_request(&request).await,
                Ok(IncomingMessage::Notification(notif)) => {
                    self.handle_notification(&notif);
                    continue;
                }
                Ok(IncomingMessage::Response(resp)) => {
                    tracing::debug!(id = %resp.id, "Ignoring unsolicited response");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to parse JSON-RPC message");
                    let err = McpError::JsonParse(e).to_rpc_error();
                    JsonRpcResponse::error(RpcId::Number(0), err.code, err.message)
                }
            };

            let json = serde_json::to_string(&response)?;
            tracing::debug!(response = %json, "Sending response");
            transport.send(&json).await?;
        }

        tracing::info!("Transport closed, shutting down");
        Ok(())
    }

    /// Handle a single JSON-RPC request and produce a response.
    pub async fn handle_request(&mut self, request: &JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let outcome = match request.method.as_str() {
            "initialize" => self.handle_initialize(),
            "ping" => Ok(serde_json::json!({})),
            "tools/list" => self.handle_list_tools(&request.params),
            "tools/call" => self.handle_call_tool(&request.params).await,
            method => {
                tracing::warn!(method = %method, "Unknown method");
                Err(McpError::MethodNotFound(method.to_string()))
            }
        };

        match outcome {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err(err) => {
                let rpc = err.to_rpc_error();
                JsonRpcResponse::error(id, rpc.code, rpc.message)
            }
        }
    }

    fn handle_notification(&mut self, notif: &JsonRpcNotification) {
        match notif.method.as_str() {
            "notifications/initialized" => tracing::info!("Client confirmed initialization"),
            "notifications/cancelled" => tracing::debug!("Client cancelled a request"),
            method => tracing::debug!(method = %method, "Unknown notification, ignoring"),
        }
    }

    fn handle_initialize(&mut self) -> Result<Value, McpError> {
        self.initialized = true;
        to_value(InitializeResult {
            protocol_version: PROTOCOL_VERSION.to_string(),
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: false }),
            },
            server_info: ServerInfo {
                name: self.server_name.clone(),
                version: Some(self.server_version.clone()),
            },
        })
    }

    fn handle_list_tools(&self, params: &Option<Value>) -> Result<Value, McpError> {
        let params: ListToolsParams = match params {
            Some(p) => serde_json::from_value(p.clone())
                .map_err(|e| McpError::InvalidParams(e.to_string()))?,
            None => ListToolsParams::default(),
        };
        let start = match params.cursor.as_deref() {
            Some(cursor) => cursor
                .parse::<usize>()
                .map_err(|_| McpError::InvalidParams(format!("bad cursor '{cursor}'")))?,
            None => 0,
        };

        let all = self.registry.list();
        let end = match self.page_size {
            Some(size) => (start + size).min(all.len()),
            None => all.len(),
        };
        let tools = all
            .into_iter()
            .skip(start)
            .take(end.saturating_sub(start))
            .map(ToolInfo::from)
            .collect();
        let next_cursor = (end < self.registry.len()).then(|| end.to_string());

        to_value(ListToolsResult { tools, next_cursor })
    }

    async fn handle_call_tool(&self, params: &Option<Value>) -> Result<Value, McpError> {
        let params = params
            .as_ref()
            .ok_or_else(|| McpError::InvalidParams("missing params".to_string()))?;
        let call: CallToolParams = serde_json::from_value(params.clone())
            .map_err(|e| McpError::InvalidParams(e.to_string()))?;

        tracing::debug!(tool = %call.name, "Handling tools/call");
        let tool = self
            .registry
            .get(&call.name)
            .ok_or_else(|| McpError::ToolNotFound(call.name.clone()))?;

        let ctx = ToolContext {
            working_directory: self.working_directory.clone(),
        };
        let (text, is_error) = match tool.execute(call.arguments, &ctx).await {
            Ok(result) => (result.content, result.is_error),
            Err(e) => (e.to_string(), true),
        };

        to_value(CallToolResult {
            content: vec![ToolContent::Text { text }],
            is_error,
        })
    }
}

fn to_value(value: impl Serialize) -> Result<Value, McpError> {
    Ok(serde_json::to_value(value)?)
}
