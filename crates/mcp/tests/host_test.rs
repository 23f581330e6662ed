//! Integration tests against the `relay-echo-server` fixture binary.
//!
//! Each test launches real subprocesses through `SubprocessToolHost` and
//! checks handshake, discovery, invocation, failure reporting and
//! termination.

use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use relay_core::{BridgeConfig, ErrorKind, HostConfig};
use relay_mcp::{LaunchSpec, SubprocessToolHost, ToolServerManager, ToolServersConfig};
use relay_tool_runtime::tool::ToolContext;
use relay_tool_runtime::{BridgeState, ToolRegistry};
use serde_json::json;

const ECHO_SERVER: &str = env!("CARGO_BIN_EXE_relay-echo-server");
const TIMEOUT: Duration = Duration::from_secs(5);

fn bridge_config() -> BridgeConfig {
    BridgeConfig {
        start_timeout: Duration::from_secs(15),
        stop_timeout: Duration::from_secs(5),
        call_timeout: TIMEOUT,
        cleanup_timeout: Duration::from_secs(5),
    }
}

fn host_config() -> HostConfig {
    HostConfig {
        handshake_timeout: Duration::from_secs(10),
        terminate_grace: Duration::from_millis(800),
        tool_servers_config: None,
    }
}

fn echo_server(args: &[&str]) -> LaunchSpec {
    LaunchSpec::new(ECHO_SERVER).with_args(args.iter().copied())
}

fn started(name: &str, args: &[&str]) -> SubprocessToolHost {
    let host = SubprocessToolHost::new(name, bridge_config(), host_config());
    host.start(&echo_server(args)).expect("echo server should start");
    host
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[test]
fn lists_capabilities_across_pages() {
    let host = started("paged", &["--page-size", "1"]);
    assert_eq!(host.state(), BridgeState::Running);
    assert!(host.process_id().is_some());

    let mut names: Vec<_> = host
        .list_capabilities(TIMEOUT)
        .unwrap()
        .into_iter()
        .map(|t| t.name)
        .collect();
    names.sort();
    assert_eq!(names, vec!["echo", "fail", "sleep"]);

    let echo = host
        .list_capabilities(TIMEOUT)
        .unwrap()
        .into_iter()
        .find(|t| t.name == "echo")
        .unwrap();
    assert_eq!(echo.input_schema["required"], json!(["message"]));

    host.stop();
}

#[test]
fn invoke_reports_success_and_failures_as_data() {
    let host = started("invoke", &[]);

    let ok = host.invoke("echo", json!({"message": "hello"}), TIMEOUT);
    assert!(!ok.is_error, "{}", ok.content);
    assert_eq!(ok.content, "hello");
    assert!(ok.tool_call_id.starts_with("call_"));

    let failed = host.invoke("fail", json!({"reason": "disk full"}), TIMEOUT);
    assert!(failed.is_error);
    assert!(failed.content.contains("disk full"));
    assert_eq!(failed.error_kind, None);

    let unknown = host.invoke("does_not_exist", json!({}), TIMEOUT);
    assert!(unknown.is_error);
    assert_eq!(unknown.error_kind, Some(ErrorKind::ToolInvocationFailure));

    host.stop();
}

#[test]
fn invoke_timeout_does_not_poison_later_calls() {
    let host = started("timeouts", &[]);

    let started_at = Instant::now();
    let slow = host.invoke("sleep", json!({"millis": 1500}), Duration::from_millis(200));
    assert!(slow.is_error);
    assert_eq!(slow.error_kind, Some(ErrorKind::Timeout));
    assert!(started_at.elapsed() < Duration::from_secs(1));

    // The fixture answers in order, so this waits for the abandoned sleep.
    let next = host.invoke("echo", json!({"message": "still here"}), TIMEOUT);
    assert!(!next.is_error, "{}", next.content);
    assert_eq!(next.content, "still here");

    host.stop();
}

#[test]
fn concurrent_callers_get_their_own_results() {
    let host = Arc::new(started("concurrent", &[]));

    let handles: Vec<_> = (0..6)
        .map(|i| {
            let host = Arc::clone(&host);
            std::thread::spawn(move || {
                let message = format!("caller-{i}");
                let result = host.invoke("echo", json!({"message": message}), TIMEOUT);
                (message, result)
            })
        })
        .collect();

    for handle in handles {
        let (message, result) = handle.join().unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, message);
    }

    host.stop();
}

#[cfg(unix)]
#[test]
fn stop_terminates_process_gracefully() {
    let host = started("graceful", &[]);
    let pid = host.process_id().unwrap();
    assert!(process_alive(pid));

    let started_at = Instant::now();
    let report = host.stop();
    assert!(report.cleanup_completed);
    assert!(report.worker_exited);
    assert!(started_at.elapsed() < Duration::from_millis(800));
    assert_eq!(host.state(), BridgeState::Stopped);
    assert!(!process_alive(pid));

    // Idempotent, and a stopped host answers with empty data.
    assert!(host.stop().cleanup_completed);
    assert!(host.list_capabilities(TIMEOUT).unwrap().is_empty());
    let result = host.invoke("echo", json!({"message": "late"}), TIMEOUT);
    assert_eq!(result.error_kind, Some(ErrorKind::ToolServerUnavailable));
}

#[cfg(unix)]
#[test]
fn stop_force_kills_after_grace() {
    let host = started("stubborn", &["--ignore-sigterm"]);
    let pid = host.process_id().unwrap();

    let started_at = Instant::now();
    let report = host.stop();
    let elapsed = started_at.elapsed();
    assert!(report.cleanup_completed);
    assert!(elapsed >= Duration::from_millis(800), "{elapsed:?}");
    assert!(elapsed < Duration::from_secs(5), "{elapsed:?}");
    assert!(!process_alive(pid));
}

#[cfg(unix)]
#[test]
fn stop_racing_start_leaves_no_process() {
    let dir = tempfile::tempdir().unwrap();
    let pid_file = dir.path().join("server.pid");
    let script = format!("echo $$ > '{}'; exec '{}'", pid_file.display(), ECHO_SERVER);

    let host = Arc::new(SubprocessToolHost::new("racing", bridge_config(), host_config()));
    let starter = {
        let host = Arc::clone(&host);
        std::thread::spawn(move || host.start(&LaunchSpec::new("sh").with_args(["-c", script.as_str()])))
    };
    std::thread::sleep(Duration::from_millis(5));
    host.stop();
    let started = starter.join().unwrap();

    // Whichever ran first, the host ends up stopped with no child left.
    if started.is_ok() {
        host.stop();
    }
    assert_eq!(host.state(), BridgeState::Stopped);
    if let Ok(pid) = std::fs::read_to_string(&pid_file) {
        let pid: u32 = pid.trim().parse().unwrap();
        assert!(!process_alive(pid));
    }
}

#[test]
fn stop_before_start_refuses_later_start() {
    let host = SubprocessToolHost::new("never", bridge_config(), host_config());
    assert!(host.stop().cleanup_completed);
    assert_eq!(host.state(), BridgeState::Stopped);
    assert!(host.start(&echo_server(&[])).is_err());
    assert!(host.process_id().is_none());
}

#[test]
fn independent_hosts_do_not_affect_each_other() {
    let healthy = started("healthy", &[]);
    let broken = SubprocessToolHost::new("broken", bridge_config(), host_config());
    assert!(broken.start(&LaunchSpec::new("/nonexistent/server")).is_err());

    let result = healthy.invoke("echo", json!({"message": "fine"}), TIMEOUT);
    assert_eq!(result.content, "fine");
    healthy.stop();
    broken.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn manager_registers_hosted_tools() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    let config = json!({
        "mcpServers": {
            "echo": {"command": ECHO_SERVER, "args": ["--page-size", "2"]},
            "off": {"command": ECHO_SERVER, "disabled": true}
        }
    });
    write!(file, "{config}").unwrap();

    let host_config = HostConfig {
        tool_servers_config: Some(file.path().to_path_buf()),
        ..host_config()
    };
    let path = file.path().to_path_buf();

    let (manager, registry) = tokio::task::spawn_blocking(move || {
        let mut manager = ToolServerManager::load(bridge_config(), host_config).unwrap();
        assert_eq!(manager.config().source.as_deref(), Some(path.as_path()));
        assert_eq!(manager.start_all(), 1);

        let mut registry = ToolRegistry::new();
        assert_eq!(manager.register_into(&mut registry, TIMEOUT), 3);
        (manager, registry)
    })
    .await
    .unwrap();

    let status = manager.status();
    let echo = status.iter().find(|s| s.name == "echo").unwrap();
    assert_eq!(echo.state.as_deref(), Some("running"));
    assert!(status.iter().find(|s| s.name == "off").unwrap().state.is_none());

    let tool = registry.get("echo").unwrap();
    let ctx = ToolContext {
        working_directory: std::env::temp_dir(),
    };
    let result = tool.execute(json!({"message": "via registry"}), &ctx).await.unwrap();
    assert_eq!(result.content, "via registry");

    tokio::task::spawn_blocking(move || {
        let mut manager = manager;
        let summary = manager.reload(ToolServersConfig::disabled());
        assert!(summary.success);
        assert_eq!(manager.running(), 0);
    })
    .await
    .unwrap();
}
