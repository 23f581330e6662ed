use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_secs(profile: &str, key: &str, default: u64) -> Duration {
    Duration::from_secs(
        profiled_env_opt(profile, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

fn profiled_env_millis(profile: &str, key: &str, default: u64) -> Duration {
    Duration::from_millis(
        profiled_env_opt(profile, key)
            .and_then(|v| v.parse().ok())
            .unwrap_or(default),
    )
}

// ── Top-level config ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Active profile name (empty = default).
    pub profile: String,
    pub bridge: BridgeConfig,
    pub host: HostConfig,
    pub watchdog: WatchdogConfig,
}

impl Config {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `RELAY_PROFILE` env var. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("RELAY_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        let mut config = Self {
            profile: p.to_string(),
            bridge: BridgeConfig::from_env_profiled(p),
            host: HostConfig::from_env_profiled(p),
            watchdog: WatchdogConfig::from_env_profiled(p),
        };
        config.enforce_limits();
        config
    }

    /// Handshake plus terminate grace must fit inside the bridge start
    /// timeout. The watchdog tick must be non-zero.
    fn enforce_limits(&mut self) {
        let handshake_limit = self
            .bridge
            .start_timeout
            .saturating_sub(self.host.terminate_grace);
        if self.host.handshake_timeout > handshake_limit {
            tracing::warn!(
                handshake = ?self.host.handshake_timeout,
                start_timeout = ?self.bridge.start_timeout,
                terminate_grace = ?self.host.terminate_grace,
                clamped = ?handshake_limit,
                "Tool server handshake timeout exceeds the bridge start budget, clamping"
            );
            self.host.handshake_timeout = handshake_limit;
        }

        if self.watchdog.tick.is_zero() {
            let tick = WatchdogConfig::default().tick;
            tracing::warn!(?tick, "WATCHDOG_TICK_MILLIS must be positive, using default");
            self.watchdog.tick = tick;
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!(
            "  bridge:    start={:?}, stop={:?}, call={:?}, cleanup={:?}",
            self.bridge.start_timeout,
            self.bridge.stop_timeout,
            self.bridge.call_timeout,
            self.bridge.cleanup_timeout
        );
        tracing::info!(
            "  host:      handshake={:?}, terminate_grace={:?}, servers_config={}",
            self.host.handshake_timeout,
            self.host.terminate_grace,
            self.host
                .tool_servers_config
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| "(search)".to_string())
        );
        tracing::info!(
            "  watchdog:  progress={:?}, warn={:?}, idle={:?}, abort={:?}",
            self.watchdog.progress_interval,
            self.watchdog.stall_warning_after,
            self.watchdog.idle_advisory_after,
            self.watchdog.abort_after
        );
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            profile: String::new(),
            bridge: BridgeConfig::default(),
            host: HostConfig::default(),
            watchdog: WatchdogConfig::default(),
        }
    }
}

// ── Bridge ────────────────────────────────────────────────────

/// Timeouts for the worker-thread bridge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// How long `start()` waits for the worker to report readiness.
    pub start_timeout: Duration,
    /// How long `stop()` waits for the worker thread to exit.
    pub stop_timeout: Duration,
    /// Default bound for a single scheduled call.
    pub call_timeout: Duration,
    /// Bound for the async cleanup hook run at the start of `stop()`.
    pub cleanup_timeout: Duration,
}

impl BridgeConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            start_timeout: profiled_env_secs(p, "BRIDGE_START_TIMEOUT_SECS", 30),
            stop_timeout: profiled_env_secs(p, "BRIDGE_STOP_TIMEOUT_SECS", 5),
            call_timeout: profiled_env_secs(p, "BRIDGE_CALL_TIMEOUT_SECS", 30),
            cleanup_timeout: profiled_env_secs(p, "BRIDGE_CLEANUP_TIMEOUT_SECS", 5),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            start_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(5),
            call_timeout: Duration::from_secs(30),
            cleanup_timeout: Duration::from_secs(5),
        }
    }
}

// ── Tool-server host ──────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Bound for launch + `initialize` handshake of a tool server.
    pub handshake_timeout: Duration,
    /// Time between the graceful terminate signal and the forced kill.
    pub terminate_grace: Duration,
    /// Explicit path of the tool-server descriptor file.
    pub tool_servers_config: Option<PathBuf>,
}

impl HostConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            handshake_timeout: profiled_env_secs(p, "TOOL_SERVER_HANDSHAKE_TIMEOUT_SECS", 20),
            terminate_grace: profiled_env_secs(p, "TOOL_SERVER_TERMINATE_GRACE_SECS", 3),
            tool_servers_config: profiled_env_opt(p, "TOOL_SERVERS_CONFIG").map(PathBuf::from),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: Duration::from_secs(20),
            terminate_grace: Duration::from_secs(3),
            tool_servers_config: None,
        }
    }
}

// ── Stall watchdog ────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchdogConfig {
    /// Progress cadence while a tool call is executing without output.
    pub progress_interval: Duration,
    /// Stall length after which a warning is added.
    pub stall_warning_after: Duration,
    /// Silence length (no tool in flight) that triggers the idle advisory.
    pub idle_advisory_after: Duration,
    /// How often the classifier wakes up while waiting for the next event.
    pub tick: Duration,
    /// Hard bound on a stall. `None` keeps the watchdog advisory-only.
    pub abort_after: Option<Duration>,
}

impl WatchdogConfig {
    fn from_env_profiled(p: &str) -> Self {
        Self {
            progress_interval: profiled_env_secs(p, "WATCHDOG_PROGRESS_INTERVAL_SECS", 15),
            stall_warning_after: profiled_env_secs(p, "WATCHDOG_STALL_WARNING_SECS", 60),
            idle_advisory_after: profiled_env_secs(p, "WATCHDOG_IDLE_ADVISORY_SECS", 30),
            tick: profiled_env_millis(p, "WATCHDOG_TICK_MILLIS", 1000),
            abort_after: profiled_env_opt(p, "WATCHDOG_ABORT_AFTER_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs),
        }
    }
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            progress_interval: Duration::from_secs(15),
            stall_warning_after: Duration::from_secs(60),
            idle_advisory_after: Duration::from_secs(30),
            tick: Duration::from_secs(1),
            abort_after: None,
        }
    }
}
