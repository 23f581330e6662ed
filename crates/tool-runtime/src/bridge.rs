//! Synchronous façade over a dedicated async worker.
//!
//! A [`BridgeHandle`] owns exactly one OS thread running a current-thread
//! tokio runtime. Callers on any thread schedule futures onto that runtime
//! with [`BridgeHandle::call`] and block until the result arrives or the
//! timeout elapses. Everything belonging to one handle (process handshakes,
//! tool invocations, cleanup) therefore runs inside a single cooperative
//! context and never in parallel.
//!
//! Readiness and results travel over channels rather than shared flags:
//! `start` waits on a readiness channel fed by the worker, and every `call`
//! gets its own reply channel.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use relay_core::{BridgeConfig, ErrorKind};
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Lifecycle of a bridge worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Unstarted,
    Starting,
    Running,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BridgeState::Unstarted => "unstarted",
            BridgeState::Starting => "starting",
            BridgeState::Running => "running",
            BridgeState::Stopping => "stopping",
            BridgeState::Stopped => "stopped",
            BridgeState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    #[error("Initialization failed: {0}")]
    Initialization(String),
    #[error("Timed out after {0:?}")]
    Timeout(Duration),
    #[error("Bridge is not running (state: {0})")]
    NotRunning(BridgeState),
    #[error("Bridge already started (state: {0})")]
    AlreadyStarted(BridgeState),
    #[error("Scheduled call was cancelled before completing")]
    Cancelled,
    #[error("Blocking bridge call issued from the bridge's own worker thread")]
    Reentrant,
}

impl BridgeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::Timeout(_) => ErrorKind::Timeout,
            BridgeError::Cancelled => ErrorKind::ToolInvocationFailure,
            BridgeError::Initialization(_)
            | BridgeError::NotRunning(_)
            | BridgeError::AlreadyStarted(_)
            | BridgeError::Reentrant => ErrorKind::Initialization,
        }
    }
}

/// Async cleanup registered with [`BridgeHandle::set_cleanup_hook`].
pub type CleanupHook = Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = ()> + Send>> + Send>;

/// What happened during [`BridgeHandle::stop`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopReport {
    /// False when the cleanup hook timed out or panicked.
    pub cleanup_completed: bool,
    /// Scheduled calls that were still outstanding and got aborted.
    pub cancelled_calls: usize,
    /// False when the worker thread did not exit in time and was leaked.
    pub worker_exited: bool,
}

impl StopReport {
    fn clean() -> Self {
        Self {
            cleanup_completed: true,
            cancelled_calls: 0,
            worker_exited: true,
        }
    }
}

struct Worker {
    handle: Handle,
    control: WorkerThread,
}

/// Shutdown signal plus the means to wait for the thread to finish.
struct WorkerThread {
    thread_id: ThreadId,
    shutdown: Option<oneshot::Sender<()>>,
    exited: mpsc::Receiver<()>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Signal the runtime to stop and wait for the thread, bounded by `timeout`.
    fn shut_down(mut self, name: &str, timeout: Duration) -> bool {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if self.thread_id == thread::current().id() {
            // Stopping from inside one of our own tasks: the thread exits once
            // that task yields, there is nothing to wait on here.
            debug!(bridge = %name, "stop requested from worker thread, not joining");
            return true;
        }
        match self.exited.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(thread) = self.thread.take() {
                    if thread.join().is_err() {
                        warn!(bridge = %name, "bridge worker thread panicked");
                    }
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                warn!(
                    bridge = %name,
                    timeout = ?timeout,
                    "bridge worker did not exit in time, leaking thread"
                );
                false
            }
        }
    }
}

struct Inner {
    state: BridgeState,
    worker: Option<Worker>,
    cleanup: Option<CleanupHook>,
}

/// Sends on drop so the stopping side learns about every exit path,
/// including a panicking worker.
struct ExitSignal(mpsc::Sender<()>);

impl Drop for ExitSignal {
    fn drop(&mut self) {
        let _ = self.0.send(());
    }
}

type Ready<T> = Result<(Handle, T), BridgeError>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Owner of one worker thread and its cooperative execution context.
pub struct BridgeHandle {
    name: String,
    config: BridgeConfig,
    /// Serializes start/stop transitions; never held by `call`.
    lifecycle: Mutex<()>,
    inner: Mutex<Inner>,
    outstanding: Mutex<HashMap<u64, AbortHandle>>,
    next_call: AtomicU64,
}

impl BridgeHandle {
    pub fn new(name: impl Into<String>, config: BridgeConfig) -> Self {
        Self {
            name: name.into(),
            config,
            lifecycle: Mutex::new(()),
            inner: Mutex::new(Inner {
                state: BridgeState::Unstarted,
                worker: None,
                cleanup: None,
            }),
            outstanding: Mutex::new(HashMap::new()),
            next_call: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub fn state(&self) -> BridgeState {
        lock(&self.inner).state
    }

    /// Start the worker. A no-op when already running.
    pub fn start(&self) -> Result<(), BridgeError> {
        if self.state() == BridgeState::Running {
            return Ok(());
        }
        match self.start_with(|| async { Ok::<(), std::convert::Infallible>(()) }) {
            Err(BridgeError::AlreadyStarted(BridgeState::Running)) => Ok(()),
            other => other,
        }
    }

    /// Start the worker and run `init` inside its execution context before
    /// reporting readiness. `init`'s output is handed back to the caller; an
    /// `Err` from it, a worker panic, or exceeding the start timeout leaves
    /// the bridge `Failed`.
    pub fn start_with<F, Fut, T, E>(&self, init: F) -> Result<T, BridgeError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + 'static,
        T: Send + 'static,
        E: fmt::Display,
    {
        let _lifecycle = lock(&self.lifecycle);
        {
            let mut inner = lock(&self.inner);
            if inner.state != BridgeState::Unstarted {
                return Err(BridgeError::AlreadyStarted(inner.state));
            }
            inner.state = BridgeState::Starting;
        }
        info!(bridge = %self.name, "Starting bridge worker");

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Ready<T>>(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = mpsc::channel::<()>();
        let name = self.name.clone();

        let spawned = thread::Builder::new()
            .name(format!("bridge-{}", self.name))
            .spawn(move || run_worker(name, init, ready_tx, shutdown_rx, exit_tx));
        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                lock(&self.inner).state = BridgeState::Failed;
                return Err(BridgeError::Initialization(format!(
                    "failed to spawn worker thread: {e}"
                )));
            }
        };

        let control = WorkerThread {
            thread_id: thread.thread().id(),
            shutdown: Some(shutdown_tx),
            exited: exit_rx,
            thread: Some(thread),
        };

        let failure = match ready_rx.recv_timeout(self.config.start_timeout) {
            Ok(Ok((handle, value))) => {
                let mut inner = lock(&self.inner);
                inner.worker = Some(Worker { handle, control });
                inner.state = BridgeState::Running;
                info!(bridge = %self.name, "Bridge worker running");
                return Ok(value);
            }
            Ok(Err(e)) => e,
            Err(RecvTimeoutError::Timeout) => BridgeError::Initialization(format!(
                "worker not ready within {:?}",
                self.config.start_timeout
            )),
            Err(RecvTimeoutError::Disconnected) => BridgeError::Initialization(
                "worker exited before reporting readiness".to_string(),
            ),
        };

        warn!(bridge = %self.name, error = %failure, "Bridge worker failed to start");
        // The worker may still be inside `init`; shutting it down drops that
        // future together with whatever it acquired.
        if !control.shut_down(&self.name, self.config.stop_timeout) {
            warn!(bridge = %self.name, "Half-started worker leaked");
        }
        lock(&self.inner).state = BridgeState::Failed;
        Err(failure)
    }

    /// Register an async hook that `stop` runs first, inside the worker.
    /// Replaces any previously registered hook.
    pub fn set_cleanup_hook<F, Fut>(&self, hook: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let hook: CleanupHook = Box::new(move || Box::pin(hook()));
        lock(&self.inner).cleanup = Some(hook);
    }

    /// Run `op` on the worker and block until it finishes or `timeout` elapses.
    ///
    /// Bridge-level failures (not running, timeout, cancellation) are
    /// converted into the operation's own error type. On timeout the
    /// operation is aborted at its next suspension point.
    ///
    /// Must not be called from a thread that is driving an async runtime;
    /// async callers go through `tokio::task::spawn_blocking`.
    pub fn call<Fut, T, E>(&self, op: Fut, timeout: Duration) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: From<BridgeError> + Send + 'static,
    {
        let (handle, worker_thread) = {
            let inner = lock(&self.inner);
            match (&inner.state, &inner.worker) {
                (BridgeState::Running, Some(worker)) => (worker.handle.clone(), worker.control.thread_id),
                (state, _) => return Err(BridgeError::NotRunning(*state).into()),
            }
        };
        if thread::current().id() == worker_thread {
            return Err(BridgeError::Reentrant.into());
        }

        let (tx, rx) = mpsc::sync_channel::<Result<T, E>>(1);
        let call_id = self.next_call.fetch_add(1, Ordering::Relaxed);
        let task = handle.spawn(async move {
            let out = op.await;
            let _ = tx.send(out);
        });
        lock(&self.outstanding).insert(call_id, task.abort_handle());

        let outcome = rx.recv_timeout(timeout);
        let abort = lock(&self.outstanding).remove(&call_id);
        match outcome {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                if let Some(abort) = abort {
                    abort.abort();
                }
                debug!(bridge = %self.name, timeout = ?timeout, "Bridge call timed out");
                Err(BridgeError::Timeout(timeout).into())
            }
            Err(RecvTimeoutError::Disconnected) => Err(BridgeError::Cancelled.into()),
        }
    }

    /// Stop the worker: run the cleanup hook, cancel outstanding calls, then
    /// stop the runtime and wait for the thread (bounded by `timeout`).
    ///
    /// Every step is best-effort; the bridge always ends up `Stopped`.
    pub fn stop(&self, timeout: Duration) -> StopReport {
        let _lifecycle = lock(&self.lifecycle);
        let (worker, cleanup) = {
            let mut inner = lock(&self.inner);
            match inner.state {
                BridgeState::Running => {
                    inner.state = BridgeState::Stopping;
                    (inner.worker.take(), inner.cleanup.take())
                }
                BridgeState::Stopped => return StopReport::clean(),
                state => {
                    debug!(bridge = %self.name, state = %state, "Stopping bridge that is not running");
                    inner.state = BridgeState::Stopped;
                    inner.cleanup = None;
                    return StopReport::clean();
                }
            }
        };

        info!(bridge = %self.name, "Stopping bridge worker");
        let mut report = StopReport::clean();

        if let Some(worker) = worker {
            let on_worker = worker.control.thread_id == thread::current().id();

            // 1. Cleanup hook
            if let Some(hook) = cleanup {
                if on_worker {
                    warn!(bridge = %self.name, "Cleanup hook skipped: stop called from worker thread");
                    report.cleanup_completed = false;
                } else {
                    report.cleanup_completed = self.run_cleanup(&worker.handle, hook);
                }
            }

            // 2. Outstanding calls
            let pending: Vec<AbortHandle> =
                lock(&self.outstanding).drain().map(|(_, abort)| abort).collect();
            report.cancelled_calls = pending.len();
            for abort in pending {
                abort.abort();
            }
            if report.cancelled_calls > 0 {
                debug!(bridge = %self.name, count = report.cancelled_calls, "Cancelled outstanding calls");
            }

            // 3. Runtime + thread
            report.worker_exited = worker.control.shut_down(&self.name, timeout);
        }

        lock(&self.inner).state = BridgeState::Stopped;
        info!(
            bridge = %self.name,
            cleanup_completed = report.cleanup_completed,
            worker_exited = report.worker_exited,
            "Bridge stopped"
        );
        report
    }

    fn run_cleanup(&self, handle: &Handle, hook: CleanupHook) -> bool {
        let (tx, rx) = mpsc::sync_channel::<()>(1);
        let task = handle.spawn(async move {
            hook().await;
            let _ = tx.send(());
        });
        match rx.recv_timeout(self.config.cleanup_timeout) {
            Ok(()) => true,
            Err(RecvTimeoutError::Timeout) => {
                task.abort();
                warn!(
                    bridge = %self.name,
                    timeout = ?self.config.cleanup_timeout,
                    "Cleanup hook timed out"
                );
                false
            }
            Err(RecvTimeoutError::Disconnected) => {
                warn!(bridge = %self.name, "Cleanup hook did not complete");
                false
            }
        }
    }
}

impl Drop for BridgeHandle {
    fn drop(&mut self) {
        if self.state() == BridgeState::Running {
            debug!(bridge = %self.name, "Bridge dropped while running, stopping");
            self.stop(self.config.stop_timeout);
        }
    }
}

impl fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

/// Body of the worker thread.
fn run_worker<F, Fut, T, E>(
    name: String,
    init: F,
    ready: SyncSender<Ready<T>>,
    shutdown: oneshot::Receiver<()>,
    exited: mpsc::Sender<()>,
) where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let _exit = ExitSignal(exited);

    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            let _ = ready.send(Err(BridgeError::Initialization(format!(
                "failed to build runtime: {e}"
            ))));
            return;
        }
    };

    let task_name = name.clone();
    runtime.block_on(async move {
        let name = task_name;
        let mut shutdown = shutdown;
        let outcome = tokio::select! {
            outcome = init() => outcome,
            _ = &mut shutdown => {
                debug!(bridge = %name, "Shutdown requested during initialization");
                return;
            }
        };
        match outcome {
            Ok(value) => {
                if ready.send(Ok((Handle::current(), value))).is_err() {
                    return;
                }
                let _ = shutdown.await;
            }
            Err(e) => {
                let _ = ready.send(Err(BridgeError::Initialization(e.to_string())));
            }
        }
    });

    // Drops every task still scheduled on the runtime.
    runtime.shutdown_timeout(Duration::from_millis(250));
    debug!(bridge = %name, "Bridge worker thread exiting");
}
