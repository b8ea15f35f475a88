use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use keepwarm::errors::{KeepwarmError, Result};
use keepwarm::types::{RunOutcome, TerminationSignal};
use keepwarm::worker::{BoxFuture, RunExecutor, WorkerLauncher, WorkerOptions, WorkerProcess};

/// Shared view of everything a [`FakeLauncher`] and its workers did.
///
/// Clone it before moving the launcher into a provider; all clones see the
/// same state.
#[derive(Clone, Default)]
pub struct FakeRecorder {
    inner: Arc<RecorderState>,
}

#[derive(Default)]
struct RecorderState {
    next_id: AtomicU64,
    launched: Mutex<Vec<WorkerOptions>>,
    terminations: Mutex<Vec<(u64, TerminationSignal)>>,
    fail_next_launch: AtomicBool,
    fail_terminations: AtomicBool,
}

impl FakeRecorder {
    /// Options passed to every successful launch, in order.
    pub fn launched(&self) -> Vec<WorkerOptions> {
        self.inner.launched.lock().unwrap().clone()
    }

    pub fn launch_count(&self) -> usize {
        self.inner.launched.lock().unwrap().len()
    }

    /// `(worker id, signal)` for every terminate call that started.
    pub fn terminations(&self) -> Vec<(u64, TerminationSignal)> {
        self.inner.terminations.lock().unwrap().clone()
    }

    /// Make the next `initialize` call fail once.
    pub fn fail_next_launch(&self) {
        self.inner.fail_next_launch.store(true, Ordering::SeqCst);
    }

    /// Make every `terminate` call return an error (after recording it).
    pub fn fail_terminations(&self, fail: bool) {
        self.inner.fail_terminations.store(fail, Ordering::SeqCst);
    }
}

/// Launcher that creates [`FakeWorker`]s without spawning anything.
///
/// Worker ids start at 1 and increase with every successful launch.
#[derive(Clone, Default)]
pub struct FakeLauncher {
    recorder: FakeRecorder,
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self) -> FakeRecorder {
        self.recorder.clone()
    }
}

impl WorkerLauncher for FakeLauncher {
    type Worker = FakeWorker;

    fn initialize(&self, options: WorkerOptions) -> BoxFuture<'_, Result<FakeWorker>> {
        let state = Arc::clone(&self.recorder.inner);
        Box::pin(async move {
            if state.fail_next_launch.swap(false, Ordering::SeqCst) {
                return Err(KeepwarmError::WorkerLaunch(
                    "fake launcher told to fail".to_string(),
                ));
            }

            let id = state.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            state.launched.lock().unwrap().push(options.clone());

            Ok(FakeWorker {
                id,
                options,
                ready_for_next_run: AtomicBool::new(true),
                ready_for_next_attempt: AtomicBool::new(false),
                recorder: Arc::clone(&state),
            })
        })
    }
}

/// In-memory worker whose readiness tests can flip directly.
///
/// `execute` answers `ok <payload>`; payloads starting with `fail` produce a
/// failed attempt (ready for next attempt), payloads starting with `crash`
/// produce an IO error (not reusable).
pub struct FakeWorker {
    id: u64,
    options: WorkerOptions,
    ready_for_next_run: AtomicBool,
    ready_for_next_attempt: AtomicBool,
    recorder: Arc<RecorderState>,
}

impl FakeWorker {
    pub fn options(&self) -> &WorkerOptions {
        &self.options
    }

    pub fn set_ready_for_next_run(&self, ready: bool) {
        self.ready_for_next_run.store(ready, Ordering::SeqCst);
    }

    pub fn set_ready_for_next_attempt(&self, ready: bool) {
        self.ready_for_next_attempt.store(ready, Ordering::SeqCst);
    }

    /// Shorthand for clearing both readiness flags.
    pub fn make_unhealthy(&self) {
        self.set_ready_for_next_run(false);
        self.set_ready_for_next_attempt(false);
    }
}

impl WorkerProcess for FakeWorker {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_ready_for_next_run(&self) -> bool {
        self.ready_for_next_run.load(Ordering::SeqCst)
    }

    fn is_ready_for_next_attempt(&self) -> bool {
        self.ready_for_next_attempt.load(Ordering::SeqCst)
    }

    fn terminate(&self, signal: TerminationSignal) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.recorder
                .terminations
                .lock()
                .unwrap()
                .push((self.id, signal));
            self.make_unhealthy();

            if self.recorder.fail_terminations.load(Ordering::SeqCst) {
                return Err(KeepwarmError::WorkerIo(format!(
                    "fake worker {} refused to terminate",
                    self.id
                )));
            }
            Ok(())
        })
    }
}

impl RunExecutor for FakeWorker {
    fn execute<'a>(&'a self, payload: &'a str) -> BoxFuture<'a, Result<RunOutcome>> {
        Box::pin(async move {
            if payload.starts_with("crash") {
                self.make_unhealthy();
                return Err(KeepwarmError::WorkerIo(format!(
                    "fake worker {} crashed",
                    self.id
                )));
            }
            if payload.starts_with("fail") {
                self.set_ready_for_next_run(false);
                self.set_ready_for_next_attempt(true);
                return Ok(RunOutcome::Failed(format!("ERR {payload}")));
            }
            self.set_ready_for_next_run(true);
            self.set_ready_for_next_attempt(false);
            Ok(RunOutcome::Success(format!("ok {payload}")))
        })
    }
}
