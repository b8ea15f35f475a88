// src/provider/process_provider.rs

//! Async shell around [`RetainedSlot`].
//!
//! `ProcessProvider` asks the slot what to do, then performs the IO the
//! decision implies: launching a new worker through the `WorkerLauncher`, or
//! terminating a discarded one. Termination is fire-and-forget: it runs on a
//! background task tracked in a `JoinSet` (or on its own thread when no
//! runtime is entered), and its errors are only logged. Dropping the
//! provider detaches pending terminations rather than cancelling them.
//!
//! The provider is not internally synchronised. One coordinating flow owns
//! it and calls `acquire` / `release` / `shutdown` in sequence.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tracing::debug;

use crate::config::ConfigFile;
use crate::environment::{DeploymentEnvironment, EnvironmentSource, merge_environment};
use crate::errors::Result;
use crate::provider::metrics::ProviderMetrics;
use crate::provider::slot::{AcquirePlan, KeepAlivePolicy, ReleaseDecision, RetainedSlot};
use crate::types::TerminationSignal;
use crate::worker::{MachineResources, WorkerLauncher, WorkerManifest, WorkerOptions, WorkerProcess};

/// Tag attached to every log event emitted by the provider.
pub const COMPONENT: &str = "process-provider";

/// Construction-time settings. Never mutated after the provider is built.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub keep_alive: KeepAlivePolicy,
    pub manifest: WorkerManifest,
    pub machine: MachineResources,
}

impl ProviderConfig {
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        Ok(Self {
            keep_alive: KeepAlivePolicy::new(
                cfg.keep_alive.enabled,
                cfg.keep_alive.max_execution_count,
            )?,
            manifest: WorkerManifest {
                cmd: cfg.worker.cmd.clone(),
                cwd: cfg.worker.cwd.clone(),
            },
            machine: MachineResources {
                name: cfg.machine.name.clone(),
                cpu: cfg.machine.cpu,
                memory_gb: cfg.machine.memory_gb,
            },
        })
    }
}

/// Per-run inputs to [`ProcessProvider::acquire`].
#[derive(Debug, Clone, Default)]
pub struct AcquireRequest {
    /// Run-scoped variables layered over the base environment.
    pub env_overrides: BTreeMap<String, String>,
    /// Passed through to the launcher untouched.
    pub is_warm_start: bool,
}

impl AcquireRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_overrides.insert(key.into(), value.into());
        self
    }

    pub fn warm_start(mut self, is_warm_start: bool) -> Self {
        self.is_warm_start = is_warm_start;
        self
    }
}

/// Hands out worker processes for sequential runs, keeping at most one warm.
pub struct ProcessProvider<L: WorkerLauncher> {
    config: ProviderConfig,
    launcher: L,
    environment: Box<dyn EnvironmentSource>,
    slot: RetainedSlot<L::Worker>,
    terminations: JoinSet<()>,
}

impl<L: WorkerLauncher> std::fmt::Debug for ProcessProvider<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessProvider")
            .field("config", &self.config)
            .field("slot", &self.slot)
            .field("pending_terminations", &self.terminations.len())
            .finish()
    }
}

impl<L: WorkerLauncher> ProcessProvider<L> {
    pub fn new(
        config: ProviderConfig,
        launcher: L,
        environment: impl EnvironmentSource + 'static,
    ) -> Self {
        debug!(
            component = COMPONENT,
            enabled = config.keep_alive.enabled(),
            max_execution_count = config.keep_alive.max_execution_count(),
            "process provider created"
        );
        Self {
            config,
            launcher,
            environment: Box::new(environment),
            slot: RetainedSlot::new(),
            terminations: JoinSet::new(),
        }
    }

    /// Build a provider from a validated config file, using the deployment
    /// settings in it as the base environment.
    pub fn from_config(cfg: &ConfigFile, launcher: L) -> Result<Self> {
        let config = ProviderConfig::from_config(cfg)?;
        Ok(Self::new(
            config,
            launcher,
            DeploymentEnvironment::from_config(cfg),
        ))
    }

    /// Get a process for the next run.
    ///
    /// Returns the retained process when keep-alive is enabled, it is
    /// reusable and it is under the execution limit. Otherwise the retained
    /// process (if any) is terminated in the background and a new one is
    /// launched. Launch errors are returned as-is and leave the slot empty.
    pub async fn acquire(&mut self, request: AcquireRequest) -> Result<Arc<L::Worker>> {
        self.reap_terminations();

        match self.slot.plan_acquire(self.config.keep_alive) {
            AcquirePlan::Reuse(process) => {
                debug!(
                    component = COMPONENT,
                    worker = process.id(),
                    execution_count = self.slot.execution_count(),
                    max_execution_count = self.config.keep_alive.max_execution_count(),
                    "reusing retained worker process"
                );
                Ok(process)
            }
            AcquirePlan::Replace { discarded, reason } => {
                if let Some(old) = discarded {
                    debug!(
                        component = COMPONENT,
                        worker = old.id(),
                        %reason,
                        "discarding retained worker process"
                    );
                    self.terminate_in_background(old);
                }

                debug!(
                    component = COMPONENT,
                    %reason,
                    warm_start = request.is_warm_start,
                    "launching new worker process"
                );
                let worker = self.launch(request).await?;
                Ok(Arc::new(worker))
            }
        }
    }

    /// Return a process after a run.
    ///
    /// With keep-alive enabled, a reusable process is retained if the
    /// execution count is still under the limit, and the count goes up by
    /// one. A process that is not retained is left to the caller; this never
    /// terminates anything.
    pub fn release(&mut self, handle: Arc<L::Worker>) -> ReleaseDecision {
        let id = handle.id();
        let decision = self.slot.offer(handle, self.config.keep_alive);

        match decision {
            ReleaseDecision::Retained { execution_count } => debug!(
                component = COMPONENT,
                worker = id,
                execution_count,
                max_execution_count = self.config.keep_alive.max_execution_count(),
                "retained worker process for the next run"
            ),
            ReleaseDecision::KeepAliveDisabled => debug!(
                component = COMPONENT,
                worker = id,
                "keep-alive disabled; not retaining worker process"
            ),
            ReleaseDecision::LimitReached => debug!(
                component = COMPONENT,
                worker = id,
                execution_count = self.slot.execution_count(),
                "execution limit reached; not retaining worker process"
            ),
            ReleaseDecision::Unhealthy => debug!(
                component = COMPONENT,
                worker = id,
                "worker process is not reusable; not retaining"
            ),
        }

        decision
    }

    /// Force-terminate and forget the retained process, if any.
    ///
    /// Idempotent. Does not wait for the termination to finish; see
    /// [`wait_for_pending_terminations`](Self::wait_for_pending_terminations).
    pub fn shutdown(&mut self) {
        match self.slot.take() {
            Some(process) => {
                debug!(
                    component = COMPONENT,
                    worker = process.id(),
                    "shutdown: discarding retained worker process"
                );
                self.terminate_in_background(process);
            }
            None => debug!(component = COMPONENT, "shutdown: no retained worker process"),
        }
    }

    pub fn metrics(&self) -> ProviderMetrics {
        ProviderMetrics {
            enabled: self.config.keep_alive.enabled(),
            execution_count: self.slot.execution_count(),
            max_execution_count: self.config.keep_alive.max_execution_count(),
            has_retained_process: !self.slot.is_empty(),
        }
    }

    /// The retained process, if any.
    pub fn retained(&self) -> Option<&Arc<L::Worker>> {
        self.slot.process()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    /// Wait for every background termination started so far on the async
    /// runtime.
    ///
    /// Optional: nothing in the provider depends on it. Useful before
    /// process exit so discarded workers are gone first. Terminations started
    /// outside a runtime run on their own thread and are not awaited here.
    pub async fn wait_for_pending_terminations(&mut self) {
        while let Some(res) = self.terminations.join_next().await {
            if let Err(e) = res {
                debug!(component = COMPONENT, error = %e, "termination task did not complete");
            }
        }
    }

    async fn launch(&self, request: AcquireRequest) -> Result<L::Worker> {
        let env = merge_environment(
            self.environment.gather_base_environment(),
            &request.env_overrides,
            self.environment.heartbeat_interval_seconds(),
        );

        let options = WorkerOptions {
            manifest: self.config.manifest.clone(),
            machine: self.config.machine.clone(),
            env,
            is_warm_start: request.is_warm_start,
        };

        self.launcher.initialize(options).await
    }

    fn terminate_in_background(&mut self, process: Arc<L::Worker>) {
        let id = process.id();
        let task = async move {
            match process.terminate(TerminationSignal::Force).await {
                Ok(()) => debug!(component = COMPONENT, worker = id, "discarded worker process terminated"),
                Err(e) => debug!(
                    component = COMPONENT,
                    worker = id,
                    error = %e,
                    "ignoring error while terminating discarded worker process"
                ),
            }
        };

        if let Ok(handle) = Handle::try_current() {
            self.terminations.spawn_on(task, &handle);
            return;
        }

        // No runtime on this thread: give the termination one of its own.
        let spawned = std::thread::Builder::new()
            .name(format!("keepwarm-terminate-{id}"))
            .spawn(move || {
                match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt.block_on(task),
                    Err(e) => debug!(
                        component = COMPONENT,
                        worker = id,
                        error = %e,
                        "could not build runtime to terminate discarded worker process"
                    ),
                }
            });
        if let Err(e) = spawned {
            debug!(
                component = COMPONENT,
                worker = id,
                error = %e,
                "could not start thread to terminate discarded worker process"
            );
        }
    }

    /// Drop bookkeeping for terminations that already finished.
    fn reap_terminations(&mut self) {
        while let Some(res) = self.terminations.try_join_next() {
            if let Err(e) = res {
                debug!(component = COMPONENT, error = %e, "termination task did not complete");
            }
        }
    }
}

impl<L: WorkerLauncher> Drop for ProcessProvider<L> {
    fn drop(&mut self) {
        // Terminations already started must outlive the provider.
        self.terminations.detach_all();
    }
}
