// src/coordinator.rs

//! Sequential run loop used by the `keepwarm` binary.
//!
//! For every payload: acquire a process, execute the run, report the
//! response, release the process. The provider decides whether the next
//! payload reuses the same process. A failed run is still released; the
//! worker's readiness decides whether it stays warm.

use std::collections::BTreeMap;
use std::future::Future;

use tracing::{info, warn};

use crate::errors::Result;
use crate::provider::{AcquireRequest, ProcessProvider};
use crate::types::RunOutcome;
use crate::worker::{RunExecutor, WorkerLauncher, WorkerProcess};

/// What happened across a batch of runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub succeeded: usize,
    pub failed: usize,
    /// Runs that did not start because a stop was requested.
    pub skipped: usize,
    pub processes_launched: usize,
}

/// Result of a single run, as reported to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub index: usize,
    pub worker: u64,
    pub reused: bool,
    pub outcome: std::result::Result<RunOutcome, String>,
}

pub struct Coordinator<L: WorkerLauncher> {
    provider: ProcessProvider<L>,
    env_overrides: BTreeMap<String, String>,
}

impl<L> Coordinator<L>
where
    L: WorkerLauncher,
    L::Worker: RunExecutor,
{
    pub fn new(provider: ProcessProvider<L>, env_overrides: BTreeMap<String, String>) -> Self {
        Self {
            provider,
            env_overrides,
        }
    }

    pub fn provider(&self) -> &ProcessProvider<L> {
        &self.provider
    }

    /// Run every payload in order until done or `stop` resolves.
    ///
    /// `on_report` is called after each run. Launch failures abort the batch
    /// and are returned; run failures are counted and the batch continues.
    /// The provider is always shut down before returning.
    pub async fn run_all<S, F>(
        &mut self,
        payloads: &[String],
        stop: S,
        mut on_report: F,
    ) -> Result<RunSummary>
    where
        S: Future<Output = ()>,
        F: FnMut(&RunReport),
    {
        let mut summary = RunSummary::default();
        tokio::pin!(stop);

        let mut result = Ok(());
        for (index, payload) in payloads.iter().enumerate() {
            let step = tokio::select! {
                biased;
                _ = &mut stop => None,
                report = self.run_one(index, payload) => Some(report),
            };

            match step {
                None => {
                    warn!(remaining = payloads.len() - index, "stop requested; skipping remaining runs");
                    summary.skipped = payloads.len() - index;
                    break;
                }
                Some(Err(e)) => {
                    result = Err(e);
                    break;
                }
                Some(Ok(report)) => {
                    if !report.reused {
                        summary.processes_launched += 1;
                    }
                    match &report.outcome {
                        Ok(RunOutcome::Success(_)) => summary.succeeded += 1,
                        _ => summary.failed += 1,
                    }
                    on_report(&report);
                }
            }
        }

        self.provider.shutdown();
        self.provider.wait_for_pending_terminations().await;

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            processes_launched = summary.processes_launched,
            "all runs finished"
        );

        result.map(|()| summary)
    }

    async fn run_one(&mut self, index: usize, payload: &str) -> Result<RunReport> {
        let warm = self.provider.metrics().has_retained_process;
        let previous = self.provider.retained().map(|p| p.id());

        let request = AcquireRequest {
            env_overrides: self.env_overrides.clone(),
            is_warm_start: warm,
        };
        let worker = self.provider.acquire(request).await?;
        let reused = previous == Some(worker.id());

        info!(run = index, worker = worker.id(), reused, "executing run");

        let outcome = worker.execute(payload).await.map_err(|e| e.to_string());
        if let Err(ref e) = outcome {
            warn!(run = index, worker = worker.id(), error = %e, "run failed");
        }

        let report = RunReport {
            index,
            worker: worker.id(),
            reused,
            outcome,
        };

        self.provider.release(worker);
        Ok(report)
    }
}
