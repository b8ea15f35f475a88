// src/worker/shell.rs

//! Worker processes started through the platform shell.
//!
//! A `ShellWorker` speaks a minimal line protocol: every run writes one line
//! to the worker's stdin and waits for one line on its stdout. A response
//! starting with `ERR` is a failed attempt; anything else is a success.
//!
//! The `Child` itself is owned by a supervisor task that waits for either
//! the process to exit or a kill request, and publishes the exit code on a
//! `watch` channel that readiness checks and `terminate` observe.

use std::process::Stdio;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::errors::{KeepwarmError, Result};
use crate::types::{RunOutcome, TerminationSignal};
use crate::worker::backend::{BoxFuture, RunExecutor, WorkerLauncher, WorkerOptions, WorkerProcess};

/// Exported to every worker so it can tell a warm start from a cold one.
pub const WARM_START_VAR: &str = "KEEPWARM_WARM_START";

/// Prefix of a response line that marks a failed attempt.
pub const FAILURE_PREFIX: &str = "ERR";

/// How long to wait for the supervisor to observe exit after a kill.
const KILL_WAIT: Duration = Duration::from_secs(5);

static NEXT_WORKER_ID: AtomicU64 = AtomicU64::new(1);

/// Launcher that starts workers via `sh -c` (or `cmd /C` on Windows).
#[derive(Debug, Clone)]
pub struct ShellLauncher {
    graceful_timeout: Duration,
}

impl ShellLauncher {
    pub fn new(graceful_timeout: Duration) -> Self {
        Self { graceful_timeout }
    }
}

impl Default for ShellLauncher {
    fn default() -> Self {
        Self::new(Duration::from_secs(2))
    }
}

impl WorkerLauncher for ShellLauncher {
    type Worker = ShellWorker;

    fn initialize(&self, options: WorkerOptions) -> BoxFuture<'_, Result<ShellWorker>> {
        let graceful_timeout = self.graceful_timeout;
        Box::pin(async move { ShellWorker::spawn(options, graceful_timeout) })
    }
}

struct WorkerIo {
    stdin: Option<ChildStdin>,
    stdout: Lines<BufReader<ChildStdout>>,
}

/// A worker process started by [`ShellLauncher`].
pub struct ShellWorker {
    id: u64,
    pid: Option<u32>,
    io: tokio::sync::Mutex<WorkerIo>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
    exit_rx: watch::Receiver<Option<i32>>,
    ready_for_next_run: AtomicBool,
    ready_for_next_attempt: AtomicBool,
    graceful_timeout: Duration,
}

impl std::fmt::Debug for ShellWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShellWorker")
            .field("id", &self.id)
            .field("pid", &self.pid)
            .field("exit_code", &self.exit_code())
            .finish()
    }
}

impl ShellWorker {
    fn spawn(options: WorkerOptions, graceful_timeout: Duration) -> Result<Self> {
        let id = NEXT_WORKER_ID.fetch_add(1, Ordering::Relaxed);
        let manifest = &options.manifest;

        let mut cmd = if cfg!(windows) {
            let mut c = Command::new("cmd");
            c.arg("/C").arg(&manifest.cmd);
            c
        } else {
            let mut c = Command::new("sh");
            c.arg("-c").arg(&manifest.cmd);
            c
        };

        if let Some(cwd) = &manifest.cwd {
            cmd.current_dir(cwd);
        }

        cmd.envs(&options.env)
            .env(WARM_START_VAR, if options.is_warm_start { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            KeepwarmError::WorkerLaunch(format!("spawning worker '{}': {e}", manifest.cmd))
        })?;

        let pid = child.id();
        let stdin = child.stdin.take();
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| KeepwarmError::WorkerLaunch("worker stdout was not piped".to_string()))?;

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(worker = id, "stderr: {}", line);
                }
            });
        }

        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exit_tx, exit_rx) = watch::channel::<Option<i32>>(None);
        tokio::spawn(supervise(id, child, kill_rx, exit_tx));

        info!(
            worker = id,
            pid = ?pid,
            cmd = %manifest.cmd,
            warm_start = options.is_warm_start,
            "started worker process"
        );

        Ok(Self {
            id,
            pid,
            io: tokio::sync::Mutex::new(WorkerIo {
                stdin,
                stdout: BufReader::new(stdout).lines(),
            }),
            kill_tx: Mutex::new(Some(kill_tx)),
            exit_rx,
            ready_for_next_run: AtomicBool::new(true),
            ready_for_next_attempt: AtomicBool::new(false),
            graceful_timeout,
        })
    }

    /// OS process id, if the process was still running when spawned.
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Exit code once the process has exited (`-1` when killed or unknown).
    pub fn exit_code(&self) -> Option<i32> {
        *self.exit_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.exit_code().is_some()
    }

    /// Send one payload line and wait for the response line.
    async fn execute_line(&self, payload: &str) -> Result<RunOutcome> {
        if payload.contains('\n') {
            return Err(KeepwarmError::WorkerIo(
                "run payload must be a single line".to_string(),
            ));
        }

        let mut io = self.io.lock().await;
        self.set_readiness(false, false);

        let result = exchange(&mut io, payload).await;
        match &result {
            Ok(RunOutcome::Success(_)) => self.set_readiness(true, false),
            Ok(RunOutcome::Failed(_)) => self.set_readiness(false, true),
            Err(e) => {
                warn!(worker = self.id, error = %e, "worker IO failed; process is not reusable");
                self.set_readiness(false, false);
            }
        }
        result
    }

    fn set_readiness(&self, next_run: bool, next_attempt: bool) {
        self.ready_for_next_run.store(next_run, Ordering::SeqCst);
        self.ready_for_next_attempt.store(next_attempt, Ordering::SeqCst);
    }

    fn request_kill(&self) {
        let sender = match self.kill_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(tx) = sender {
            if tx.send(()).is_err() {
                debug!(worker = self.id, "supervisor already finished while killing");
            }
        }
    }

    /// Wait until the supervisor reports an exit, up to `limit`.
    async fn wait_for_exit(&self, limit: Duration) -> bool {
        let mut rx = self.exit_rx.clone();
        match tokio::time::timeout(limit, rx.wait_for(|code| code.is_some())).await {
            Ok(res) => res.is_ok(),
            Err(_) => false,
        }
    }

    async fn terminate_inner(&self, signal: TerminationSignal) -> Result<()> {
        self.set_readiness(false, false);

        if self.has_exited() {
            debug!(worker = self.id, "terminate requested but worker already exited");
            return Ok(());
        }

        info!(worker = self.id, %signal, "terminating worker process");

        if signal == TerminationSignal::Graceful {
            // Closing stdin is the worker's cue to finish up.
            self.io.lock().await.stdin.take();
            if self.wait_for_exit(self.graceful_timeout).await {
                return Ok(());
            }
            debug!(
                worker = self.id,
                timeout_ms = self.graceful_timeout.as_millis() as u64,
                "worker did not exit within grace period; killing"
            );
        }

        self.request_kill();

        if self.wait_for_exit(KILL_WAIT).await {
            Ok(())
        } else {
            Err(KeepwarmError::WorkerIo(format!(
                "worker {} did not exit after kill",
                self.id
            )))
        }
    }
}

impl WorkerProcess for ShellWorker {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_ready_for_next_run(&self) -> bool {
        !self.has_exited() && self.ready_for_next_run.load(Ordering::SeqCst)
    }

    fn is_ready_for_next_attempt(&self) -> bool {
        !self.has_exited() && self.ready_for_next_attempt.load(Ordering::SeqCst)
    }

    fn terminate(&self, signal: TerminationSignal) -> BoxFuture<'_, Result<()>> {
        Box::pin(self.terminate_inner(signal))
    }
}

impl RunExecutor for ShellWorker {
    fn execute<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<RunOutcome>> {
        Box::pin(self.execute_line(payload))
    }
}

async fn exchange(io: &mut WorkerIo, payload: &str) -> Result<RunOutcome> {
    let stdin = io
        .stdin
        .as_mut()
        .ok_or_else(|| KeepwarmError::WorkerIo("worker stdin is closed".to_string()))?;

    let write = async {
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await
    };
    write
        .await
        .map_err(|e| KeepwarmError::WorkerIo(format!("writing run payload: {e}")))?;

    match io.stdout.next_line().await {
        Ok(Some(line)) if line.starts_with(FAILURE_PREFIX) => Ok(RunOutcome::Failed(line)),
        Ok(Some(line)) => Ok(RunOutcome::Success(line)),
        Ok(None) => Err(KeepwarmError::WorkerIo(
            "worker closed stdout before responding".to_string(),
        )),
        Err(e) => Err(KeepwarmError::WorkerIo(format!("reading run response: {e}"))),
    }
}

/// Own the child until it exits or a kill is requested.
///
/// Dropping the `ShellWorker` drops the kill sender, which also ends in a
/// kill, so no worker outlives its last handle.
async fn supervise(
    id: u64,
    mut child: Child,
    kill_rx: oneshot::Receiver<()>,
    exit_tx: watch::Sender<Option<i32>>,
) {
    let code = tokio::select! {
        status = child.wait() => match status {
            Ok(status) => status.code().unwrap_or(-1),
            Err(e) => {
                warn!(worker = id, error = %e, "failed waiting for worker process");
                -1
            }
        },
        request = kill_rx => {
            match request {
                Ok(()) => debug!(worker = id, "kill requested for worker process"),
                Err(_) => debug!(worker = id, "worker handle dropped; killing process"),
            }
            if let Err(e) = child.kill().await {
                warn!(worker = id, error = %e, "failed to kill worker process");
            }
            -1
        }
    };

    info!(worker = id, exit_code = code, "worker process exited");
    let _ = exit_tx.send(Some(code));
}
