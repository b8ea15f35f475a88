// src/worker/backend.rs

//! Pluggable worker process abstraction.
//!
//! The provider talks to a `WorkerLauncher` and the `WorkerProcess` values it
//! produces instead of raw child processes. This keeps the reuse policy
//! independent of how a worker is spawned or how it executes runs.
//!
//! - [`ShellLauncher`](super::ShellLauncher) is the implementation used by
//!   the `keepwarm` binary.
//! - Tests provide launchers that hand out fake workers whose readiness can
//!   be flipped at will and which record termination requests.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;

use crate::errors::Result;
use crate::types::{RunOutcome, TerminationSignal};

/// Boxed future returned by the worker traits.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerManifest {
    /// Shell command line that starts the worker.
    pub cmd: String,
    /// Working directory, `None` to inherit.
    pub cwd: Option<PathBuf>,
}

impl WorkerManifest {
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            cwd: None,
        }
    }
}

/// Resource limits the worker is told about.
#[derive(Debug, Clone, PartialEq)]
pub struct MachineResources {
    pub name: String,
    pub cpu: f64,
    pub memory_gb: f64,
}

impl Default for MachineResources {
    fn default() -> Self {
        Self {
            name: "small-1x".to_string(),
            cpu: 0.5,
            memory_gb: 0.5,
        }
    }
}

/// Everything a launcher needs to construct a new worker process.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub manifest: WorkerManifest,
    pub machine: MachineResources,
    /// Fully merged environment (see [`crate::environment::merge_environment`]).
    pub env: BTreeMap<String, String>,
    /// Informational hint from the caller; passed through untouched.
    pub is_warm_start: bool,
}

/// A running worker process, as seen by the provider.
///
/// Handles are shared as `Arc<Self>` between the provider's retained slot and
/// the caller executing a run, so every method takes `&self`.
pub trait WorkerProcess: Send + Sync + 'static {
    /// Stable identifier used in log output.
    fn id(&self) -> u64;

    /// The last run completed and the process can take another one.
    fn is_ready_for_next_run(&self) -> bool;

    /// The last attempt failed but the process itself is fine to retry on.
    fn is_ready_for_next_attempt(&self) -> bool;

    /// Health predicate used by the provider. Either readiness signal makes
    /// a process reusable.
    fn is_reusable(&self) -> bool {
        self.is_ready_for_next_run() || self.is_ready_for_next_attempt()
    }

    /// Stop the process.
    fn terminate(&self, signal: TerminationSignal) -> BoxFuture<'_, Result<()>>;
}

/// Constructs new worker processes.
pub trait WorkerLauncher: Send + Sync + 'static {
    type Worker: WorkerProcess;

    /// Start and initialise a new worker. Failures are returned to whoever
    /// asked for the process; the launcher does not retry.
    fn initialize(&self, options: WorkerOptions) -> BoxFuture<'_, Result<Self::Worker>>;
}

/// Workers that can execute a run on behalf of a coordinator.
///
/// Kept apart from [`WorkerProcess`]: the provider never executes runs, it
/// only decides which process they go to.
pub trait RunExecutor: WorkerProcess {
    /// Execute one run with the given single-line payload.
    fn execute<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<RunOutcome>>;
}
