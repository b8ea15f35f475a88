// tests/shell_worker.rs
//
// Real `sh` worker processes. Unix only.
#![cfg(unix)]

use std::collections::BTreeMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use keepwarm::errors::KeepwarmError;
use keepwarm::provider::{AcquireRequest, ProcessProvider};
use keepwarm::types::{RunOutcome, TerminationSignal};
use keepwarm::worker::{
    MachineResources, RunExecutor, ShellLauncher, ShellWorker, WorkerLauncher, WorkerManifest,
    WorkerOptions, WorkerProcess,
};
use keepwarm_test_utils::builders::{provider_config, test_environment};
use keepwarm_test_utils::{init_tracing, with_timeout};

type TestResult = Result<(), Box<dyn Error>>;

const ECHO_WORKER: &str = r#"while IFS= read -r line; do
  case "$line" in
    bad*) echo "ERR $line" ;;
    *) echo "$$ $line" ;;
  esac
done"#;

fn options(cmd: &str) -> WorkerOptions {
    WorkerOptions {
        manifest: WorkerManifest::new(cmd),
        machine: MachineResources::default(),
        env: BTreeMap::new(),
        is_warm_start: false,
    }
}

async fn launch(cmd: &str) -> keepwarm::errors::Result<ShellWorker> {
    ShellLauncher::new(Duration::from_millis(200))
        .initialize(options(cmd))
        .await
}

async fn wait_until_exited(worker: &ShellWorker) {
    while !worker.has_exited() {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn executes_runs_and_tracks_readiness() -> TestResult {
    init_tracing();
    let worker = launch(ECHO_WORKER).await?;
    assert!(worker.is_reusable());

    let first = with_timeout(worker.execute("hello")).await?;
    assert!(first.is_success());
    assert!(first.response().ends_with(" hello"));
    assert!(worker.is_ready_for_next_run());
    assert!(!worker.is_ready_for_next_attempt());

    let failed = with_timeout(worker.execute("bad input")).await?;
    assert_eq!(failed, RunOutcome::Failed("ERR bad input".to_string()));
    assert!(!worker.is_ready_for_next_run());
    assert!(worker.is_ready_for_next_attempt());
    assert!(worker.is_reusable());

    with_timeout(worker.terminate(TerminationSignal::Force)).await?;
    assert!(worker.has_exited());
    assert!(!worker.is_reusable());
    Ok(())
}

#[tokio::test]
async fn exited_worker_is_not_reusable() -> TestResult {
    init_tracing();
    let worker = launch(r#"read -r line; echo "done $line""#).await?;

    let outcome = with_timeout(worker.execute("once")).await?;
    assert_eq!(outcome, RunOutcome::Success("done once".to_string()));

    with_timeout(wait_until_exited(&worker)).await;
    assert_eq!(worker.exit_code(), Some(0));
    assert!(!worker.is_reusable());
    Ok(())
}

#[tokio::test]
async fn worker_dying_mid_run_is_an_io_error() -> TestResult {
    init_tracing();
    let worker = launch("read -r line; exit 3").await?;

    match with_timeout(worker.execute("boom")).await {
        Err(KeepwarmError::WorkerIo(msg)) => assert!(msg.contains("closed stdout")),
        other => panic!("Expected WorkerIo error, got: {:?}", other),
    }
    assert!(!worker.is_ready_for_next_run());
    assert!(!worker.is_ready_for_next_attempt());
    Ok(())
}

#[tokio::test]
async fn multi_line_payload_is_rejected_without_touching_readiness() -> TestResult {
    init_tracing();
    let worker = launch(ECHO_WORKER).await?;

    assert!(matches!(
        worker.execute("a\nb").await,
        Err(KeepwarmError::WorkerIo(_))
    ));
    assert!(worker.is_reusable());

    worker.terminate(TerminationSignal::Force).await?;
    Ok(())
}

#[tokio::test]
async fn graceful_termination_closes_stdin() -> TestResult {
    init_tracing();
    let worker = launch(ECHO_WORKER).await?;

    with_timeout(worker.terminate(TerminationSignal::Graceful)).await?;
    // The read loop ends on EOF, so the shell exits on its own.
    assert_eq!(worker.exit_code(), Some(0));
    Ok(())
}

#[tokio::test]
async fn graceful_termination_falls_back_to_kill() -> TestResult {
    init_tracing();
    let worker = launch("exec sleep 30").await?;

    with_timeout(worker.terminate(TerminationSignal::Graceful)).await?;
    assert_eq!(worker.exit_code(), Some(-1));

    // Terminating again is harmless.
    worker.terminate(TerminationSignal::Force).await?;
    Ok(())
}

#[tokio::test]
async fn launch_receives_environment() -> TestResult {
    init_tracing();
    let mut opts = options(
        r#"read -r line; echo "$GREETING $KEEPWARM_WARM_START $line""#,
    );
    opts.env.insert("GREETING".to_string(), "hi".to_string());
    opts.is_warm_start = true;

    let worker = ShellLauncher::default().initialize(opts).await?;
    let outcome = with_timeout(worker.execute("there")).await?;

    assert_eq!(outcome, RunOutcome::Success("hi 1 there".to_string()));
    Ok(())
}

#[tokio::test]
async fn provider_reuses_shell_worker_until_limit() -> TestResult {
    init_tracing();
    let mut config = provider_config(true, 2);
    config.manifest = WorkerManifest::new(ECHO_WORKER);
    let mut provider = ProcessProvider::new(
        config,
        ShellLauncher::new(Duration::from_millis(200)),
        test_environment(),
    );

    let mut pids = Vec::new();
    for i in 0..3 {
        let worker = provider.acquire(AcquireRequest::new()).await?;
        let outcome = with_timeout(worker.execute(&format!("run {i}"))).await?;
        let pid = outcome
            .response()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        pids.push(pid);
        provider.release(Arc::clone(&worker));
    }

    // Runs 0 and 1 share a process; the limit forces a new one for run 2.
    assert_eq!(pids[0], pids[1]);
    assert_ne!(pids[1], pids[2]);

    provider.shutdown();
    with_timeout(provider.wait_for_pending_terminations()).await;
    assert!(!provider.metrics().has_retained_process);
    Ok(())
}

#[tokio::test]
async fn launch_failure_in_missing_cwd_is_reported() {
    init_tracing();
    let mut opts = options(ECHO_WORKER);
    opts.manifest.cwd = Some("/definitely/not/a/dir".into());

    match ShellLauncher::default().initialize(opts).await {
        Err(KeepwarmError::WorkerLaunch(msg)) => assert!(msg.contains("spawning worker")),
        Err(e) => panic!("Expected WorkerLaunch error, got: {:?}", e),
        Ok(_) => panic!("Expected error, got Ok"),
    }
}
