//! One live tool-server subprocess and its JSON-RPC channel.
//!
//! The connection is built and used entirely inside a bridge worker's
//! runtime. Three tasks serve the child's stdio:
//!
//! - **writer**: drains an mpsc queue of outgoing lines into stdin
//! - **reader**: parses stdout lines and routes responses to the oneshot
//!   registered under their request id
//! - **stderr**: forwards diagnostic lines to the log
//!
//! Requests from concurrent callers interleave freely; each one only waits
//! on its own oneshot.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use relay_tool_runtime::ToolDefinition;

use crate::error::McpError;
use crate::launch::LaunchSpec;
use crate::types::*;

const OUTGOING_QUEUE: usize = 64;
const EXIT_STATUS_WAIT: Duration = Duration::from_millis(200);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(100);

type PendingMap = Arc<Mutex<HashMap<i64, oneshot::Sender<JsonRpcResponse>>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Removes a pending entry when the waiting request goes away, including
/// when it is aborted by a timeout.
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    id: i64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock(self.pending).remove(&self.id);
    }
}

pub struct ToolServerConnection {
    name: String,
    pid: Option<u32>,
    child: tokio::sync::Mutex<Child>,
    outgoing: mpsc::Sender<String>,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    next_id: AtomicI64,
    server_info: Option<ServerInfo>,
    tools: tokio::sync::Mutex<Option<Vec<ToolDefinition>>>,
    tasks: Vec<JoinHandle<()>>,
}

impl ToolServerConnection {
    /// Launch the process and complete the `initialize` handshake within
    /// `handshake_timeout`. On any failure the process is terminated before
    /// the error is returned.
    pub async fn launch(
        name: &str,
        spec: &LaunchSpec,
        handshake_timeout: Duration,
        terminate_grace: Duration,
    ) -> Result<Self, McpError> {
        info!(server = %name, command = %spec, "Launching tool server");

        let mut child = spec.to_command().spawn().map_err(|e| {
            McpError::ServerUnavailable(format!("failed to launch '{spec}': {e}"))
        })?;
        let pid = child.id();

        let (stdin, stdout, stderr) = match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
            (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
            _ => {
                let _ = child.kill().await;
                return Err(McpError::ServerUnavailable(format!(
                    "tool server '{name}' stdio was not captured"
                )));
            }
        };

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));
        let (outgoing, queue) = mpsc::channel::<String>(OUTGOING_QUEUE);

        let tasks = vec![
            tokio::spawn(write_loop(name.to_string(), stdin, queue)),
            tokio::spawn(read_loop(
                name.to_string(),
                stdout,
                Arc::clone(&pending),
                Arc::clone(&closed),
                outgoing.clone(),
            )),
            tokio::spawn(log_stderr(name.to_string(), stderr)),
        ];

        let mut conn = Self {
            name: name.to_string(),
            pid,
            child: tokio::sync::Mutex::new(child),
            outgoing,
            pending,
            closed,
            next_id: AtomicI64::new(1),
            server_info: None,
            tools: tokio::sync::Mutex::new(None),
            tasks,
        };

        let failure = match tokio::time::timeout(handshake_timeout, conn.initialize()).await {
            Ok(Ok(result)) => {
                info!(
                    server = %name,
                    pid = ?pid,
                    remote = %result.server_info.name,
                    protocol = %result.protocol_version,
                    "Tool server ready"
                );
                conn.server_info = Some(result.server_info);
                return Ok(conn);
            }
            Ok(Err(e)) => match conn.exit_status().await {
                Some(status) => format!("tool server '{name}' exited during handshake ({status})"),
                None => format!("tool server '{name}' handshake failed: {e}"),
            },
            Err(_) => format!(
                "tool server '{name}' did not answer initialize within {handshake_timeout:?}"
            ),
        };

        warn!(server = %name, error = %failure, "Tool server failed to start");
        conn.shutdown(terminate_grace).await;
        Err(McpError::ServerUnavailable(failure))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn process_id(&self) -> Option<u32> {
        self.pid
    }

    pub fn server_info(&self) -> Option<&ServerInfo> {
        self.server_info.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn initialize(&self) -> Result<InitializeResult, McpError> {
        let params = serde_json::to_value(InitializeParams::for_client("relay"))?;
        let result = self.request("initialize", Some(params)).await?;
        let result: InitializeResult = serde_json::from_value(result)?;
        self.notify("notifications/initialized", None).await?;
        Ok(result)
    }

    /// Send a request and wait for the response carrying the same id.
    async fn request(&self, method: &str, params: Option<Value>) -> Result<Value, McpError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(id, tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };
        if self.is_closed() {
            return Err(self.closed_error());
        }

        let line = serde_json::to_string(&JsonRpcRequest::new(RpcId::Number(id), method, params))?;
        debug!(server = %self.name, method = %method, id, "Sending request");
        self.outgoing
            .send(line)
            .await
            .map_err(|_| self.closed_error())?;

        let response = rx.await.map_err(|_| self.closed_error())?;
        if let Some(err) = response.error {
            return Err(McpError::Remote {
                code: err.code,
                message: err.message,
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    async fn notify(&self, method: &str, params: Option<Value>) -> Result<(), McpError> {
        let line = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.outgoing
            .send(line)
            .await
            .map_err(|_| self.closed_error())
    }

    fn closed_error(&self) -> McpError {
        McpError::ServerUnavailable(format!("tool server '{}' closed the connection", self.name))
    }

    /// Advertised tools, fetched on first use and cached. Follows
    /// `nextCursor` until the last page.
    pub async fn list_tools(&self) -> Result<Vec<ToolDefinition>, McpError> {
        let mut cache = self.tools.lock().await;
        if let Some(tools) = cache.as_ref() {
            return Ok(tools.clone());
        }

        let mut tools = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let params = serde_json::to_value(ListToolsParams {
                cursor: cursor.clone(),
            })?;
            let page: ListToolsResult =
                serde_json::from_value(self.request("tools/list", Some(params)).await?)?;
            tools.extend(page.tools.into_iter().map(ToolDefinition::from));

            match page.next_cursor {
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    warn!(server = %self.name, cursor = %next, "Tool list cursor did not advance");
                    break;
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        info!(server = %self.name, count = tools.len(), "Tool discovery complete");
        *cache = Some(tools.clone());
        Ok(tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<CallToolResult, McpError> {
        let params = serde_json::to_value(CallToolParams {
            name: name.to_string(),
            arguments,
        })?;
        let result = self.request("tools/call", Some(params)).await?;
        Ok(serde_json::from_value(result)?)
    }

    /// Exit status if the process has already exited or does so shortly.
    async fn exit_status(&self) -> Option<ExitStatus> {
        let mut child = self.child.lock().await;
        match tokio::time::timeout(EXIT_STATUS_WAIT, child.wait()).await {
            Ok(Ok(status)) => Some(status),
            _ => None,
        }
    }

    /// Close stdin, ask the process to terminate, force-kill it after
    /// `grace`, and reap it. Idempotent.
    pub async fn shutdown(&self, grace: Duration) {
        // Writer owns stdin; aborting it closes the pipe.
        if let Some(writer) = self.tasks.first() {
            writer.abort();
        }

        let mut child = self.child.lock().await;
        if child.try_wait().ok().flatten().is_none() {
            terminate(&self.name, &mut child).await;

            let deadline = tokio::time::sleep(grace);
            tokio::pin!(deadline);
            loop {
                if let Some(status) = child.try_wait().ok().flatten() {
                    info!(server = %self.name, status = %status, "Tool server exited");
                    break;
                }
                tokio::select! {
                    _ = &mut deadline => {
                        warn!(server = %self.name, grace = ?grace, "Tool server ignored terminate, force killing");
                        if let Err(e) = child.kill().await {
                            warn!(server = %self.name, error = %e, "Force kill failed");
                        }
                        break;
                    }
                    _ = tokio::time::sleep(EXIT_POLL_INTERVAL) => {}
                }
            }
        }
        drop(child);

        for task in &self.tasks {
            task.abort();
        }
        self.closed.store(true, Ordering::SeqCst);
        lock(&self.pending).clear();
    }
}

impl Drop for ToolServerConnection {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Graceful terminate signal.
async fn terminate(name: &str, child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    #[cfg(unix)]
    {
        match send_sigterm(pid).await {
            Ok(()) => info!(server = %name, pid, "Sent SIGTERM"),
            Err(e) => {
                warn!(server = %name, pid, error = %e, "Could not send SIGTERM");
                let _ = child.start_kill();
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = child.start_kill();
        info!(server = %name, pid, "Sent kill signal");
    }
}

#[cfg(unix)]
async fn send_sigterm(pid: u32) -> Result<(), String> {
    let output = tokio::process::Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .output()
        .await
        .map_err(|e| e.to_string())?;
    if output.status.success() {
        Ok(())
    } else {
        Err(format!(
            "kill -TERM {pid} {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        ))
    }
}

async fn write_loop(name: String, mut stdin: ChildStdin, mut queue: mpsc::Receiver<String>) {
    while let Some(line) = queue.recv().await {
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            warn!(server = %name, error = %e, "Write to tool server failed");
            break;
        }
    }
    debug!(server = %name, "Writer finished");
}

async fn read_loop(
    name: String,
    stdout: ChildStdout,
    pending: PendingMap,
    closed: Arc<AtomicBool>,
    outgoing: mpsc::Sender<String>,
) {
    let mut lines = BufReader::new(stdout).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    route(&name, line, &pending, &outgoing).await;
                }
            }
            Ok(None) => {
                debug!(server = %name, "Tool server closed stdout");
                break;
            }
            Err(e) => {
                warn!(server = %name, error = %e, "Read from tool server failed");
                break;
            }
        }
    }

    closed.store(true, Ordering::SeqCst);
    // Dropping the senders wakes every waiter with a closed-connection error.
    let dropped = {
        let mut pending = lock(&pending);
        let count = pending.len();
        pending.clear();
        count
    };
    if dropped > 0 {
        warn!(server = %name, pending = dropped, "Connection closed with requests in flight");
    }
}

async fn route(name: &str, line: &str, pending: &PendingMap, outgoing: &mpsc::Sender<String>) {
    match IncomingMessage::parse(line) {
        Ok(IncomingMessage::Response(response)) => {
            let waiter = match &response.id {
                RpcId::Number(id) => lock(pending).remove(id),
                RpcId::String(_) => None,
            };
            match waiter {
                Some(tx) => {
                    let _ = tx.send(response);
                }
                None => debug!(server = %name, id = %response.id, "Response for unknown or abandoned request"),
            }
        }
        Ok(IncomingMessage::Request(request)) => {
            debug!(server = %name, method = %request.method, "Refusing server-initiated request");
            let reply = JsonRpcResponse::error(
                request.id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            );
            if let Ok(json) = serde_json::to_string(&reply) {
                let _ = outgoing.send(json).await;
            }
        }
        Ok(IncomingMessage::Notification(notification)) => {
            debug!(server = %name, method = %notification.method, "Tool server notification");
        }
        Err(e) => {
            warn!(server = %name, error = %e, line = %line, "Ignoring non-JSON-RPC output");
        }
    }
}

async fn log_stderr(name: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        debug!(server = %name, "{line}");
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sigterm_reaches_live_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        send_sigterm(pid).await.unwrap();
        let status = tokio::time::timeout(Duration::from_secs(5), child.wait())
            .await
            .unwrap()
            .unwrap();
        assert!(!status.success());
    }

    #[tokio::test]
    async fn test_sigterm_to_missing_process_is_an_error() {
        // Above any kernel pid_max, so no such process can exist.
        let err = send_sigterm(99_999_999).await.unwrap_err();
        assert!(err.starts_with("kill -TERM 99999999"), "{err}");
    }
}
