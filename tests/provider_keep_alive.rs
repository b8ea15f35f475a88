// tests/provider_keep_alive.rs

use std::error::Error;
use std::sync::Arc;

use keepwarm::provider::{AcquireRequest, ProviderMetrics, ReleaseDecision};
use keepwarm::types::TerminationSignal;
use keepwarm::worker::WorkerProcess;
use keepwarm_test_utils::builders::fake_provider;
use keepwarm_test_utils::init_tracing;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn keep_alive_disabled_never_retains() -> TestResult {
    init_tracing();
    let (mut provider, recorder) = fake_provider(false, 5);

    for _ in 0..3 {
        let worker = provider.acquire(AcquireRequest::new()).await?;
        assert_eq!(provider.release(worker), ReleaseDecision::KeepAliveDisabled);
        assert_eq!(
            provider.metrics(),
            ProviderMetrics {
                enabled: false,
                execution_count: 0,
                max_execution_count: 5,
                has_retained_process: false,
            }
        );
    }

    assert_eq!(recorder.launch_count(), 3);
    Ok(())
}

#[tokio::test]
async fn release_of_healthy_handle_retains_and_counts() -> TestResult {
    init_tracing();
    let (mut provider, _recorder) = fake_provider(true, 3);

    let worker = provider.acquire(AcquireRequest::new()).await?;
    let decision = provider.release(Arc::clone(&worker));

    assert_eq!(decision, ReleaseDecision::Retained { execution_count: 1 });
    let retained = provider.retained().expect("process should be retained");
    assert!(Arc::ptr_eq(retained, &worker));
    assert_eq!(provider.metrics().execution_count, 1);
    assert!(provider.metrics().has_retained_process);
    Ok(())
}

#[tokio::test]
async fn reuse_does_not_increment_count_on_acquire() -> TestResult {
    init_tracing();
    let (mut provider, recorder) = fake_provider(true, 3);

    let first = provider.acquire(AcquireRequest::new()).await?;
    provider.release(Arc::clone(&first));

    let again = provider.acquire(AcquireRequest::new()).await?;
    assert!(Arc::ptr_eq(&first, &again));
    assert_eq!(provider.metrics().execution_count, 1);

    // Acquiring repeatedly without releasing never moves the count.
    let third = provider.acquire(AcquireRequest::new()).await?;
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(provider.metrics().execution_count, 1);
    assert_eq!(recorder.launch_count(), 1);
    Ok(())
}

#[tokio::test]
async fn max_two_scenario_replaces_process_at_limit() -> TestResult {
    init_tracing();
    let (mut provider, recorder) = fake_provider(true, 2);

    let a = provider.acquire(AcquireRequest::new()).await?;
    assert_eq!(a.id(), 1);
    provider.release(Arc::clone(&a));
    assert_eq!(provider.metrics().execution_count, 1);

    let reused = provider.acquire(AcquireRequest::new()).await?;
    assert!(Arc::ptr_eq(&a, &reused));
    assert_eq!(provider.metrics().execution_count, 1);

    provider.release(reused);
    assert_eq!(provider.metrics().execution_count, 2);
    assert!(provider.metrics().has_retained_process);

    let b = provider.acquire(AcquireRequest::new()).await?;
    assert_eq!(b.id(), 2);
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(provider.metrics().execution_count, 0);
    assert!(!provider.metrics().has_retained_process);

    provider.wait_for_pending_terminations().await;
    assert_eq!(recorder.terminations(), vec![(1, TerminationSignal::Force)]);
    Ok(())
}

#[tokio::test]
async fn unhealthy_retained_process_is_replaced_regardless_of_count() -> TestResult {
    init_tracing();
    let (mut provider, recorder) = fake_provider(true, 10);

    let worker = provider.acquire(AcquireRequest::new()).await?;
    provider.release(Arc::clone(&worker));
    assert_eq!(provider.metrics().execution_count, 1);

    worker.make_unhealthy();

    let next = provider.acquire(AcquireRequest::new()).await?;
    assert_ne!(next.id(), worker.id());
    assert_eq!(provider.metrics().execution_count, 0);

    provider.wait_for_pending_terminations().await;
    assert_eq!(recorder.terminations(), vec![(worker.id(), TerminationSignal::Force)]);
    Ok(())
}

#[tokio::test]
async fn ready_for_next_attempt_alone_counts_as_reusable() -> TestResult {
    init_tracing();
    let (mut provider, recorder) = fake_provider(true, 10);

    let worker = provider.acquire(AcquireRequest::new()).await?;
    worker.set_ready_for_next_run(false);
    worker.set_ready_for_next_attempt(true);

    assert_eq!(
        provider.release(Arc::clone(&worker)),
        ReleaseDecision::Retained { execution_count: 1 }
    );

    let again = provider.acquire(AcquireRequest::new()).await?;
    assert!(Arc::ptr_eq(&worker, &again));
    assert_eq!(recorder.launch_count(), 1);
    Ok(())
}

#[tokio::test]
async fn release_of_unhealthy_handle_leaves_slot_unchanged() -> TestResult {
    init_tracing();
    let (mut provider, _recorder) = fake_provider(true, 10);

    // Empty slot stays empty.
    let sick = provider.acquire(AcquireRequest::new()).await?;
    sick.make_unhealthy();
    assert_eq!(provider.release(sick), ReleaseDecision::Unhealthy);
    assert!(!provider.metrics().has_retained_process);
    assert_eq!(provider.metrics().execution_count, 0);

    // A retained process is not displaced by an unhealthy one.
    let healthy = provider.acquire(AcquireRequest::new()).await?;
    provider.release(Arc::clone(&healthy));
    let before = provider.metrics();

    let other = provider.acquire(AcquireRequest::new()).await?;
    assert!(Arc::ptr_eq(&healthy, &other));
    other.make_unhealthy();
    assert_eq!(provider.release(other), ReleaseDecision::Unhealthy);

    assert_eq!(provider.metrics(), before);
    assert!(Arc::ptr_eq(provider.retained().unwrap(), &healthy));
    Ok(())
}

#[tokio::test]
async fn release_at_limit_is_not_retained() -> TestResult {
    init_tracing();
    let (mut provider, _recorder) = fake_provider(true, 1);

    let worker = provider.acquire(AcquireRequest::new()).await?;
    assert_eq!(
        provider.release(Arc::clone(&worker)),
        ReleaseDecision::Retained { execution_count: 1 }
    );

    // Returning the same handle again at the limit changes nothing.
    assert_eq!(provider.release(Arc::clone(&worker)), ReleaseDecision::LimitReached);
    assert_eq!(provider.metrics().execution_count, 1);
    Ok(())
}

#[tokio::test]
async fn new_process_receives_merged_environment_and_warm_hint() -> TestResult {
    init_tracing();
    let (mut provider, recorder) = fake_provider(true, 3);

    let request = AcquireRequest::new()
        .with_env("RUN_ID", "run_1")
        .with_env("KEEPWARM_CONTENT_HASH", "override")
        .warm_start(true);
    let worker = provider.acquire(request).await?;

    let env = &worker.options().env;
    assert_eq!(env.get("RUN_ID").map(String::as_str), Some("run_1"));
    assert_eq!(
        env.get("KEEPWARM_CONTENT_HASH").map(String::as_str),
        Some("override")
    );
    assert_eq!(
        env.get("KEEPWARM_DEPLOYMENT_VERSION").map(String::as_str),
        Some("v1")
    );
    assert_eq!(
        env.get("KEEPWARM_HEARTBEAT_INTERVAL_MS").map(String::as_str),
        Some("30000")
    );
    assert!(worker.options().is_warm_start);
    assert_eq!(recorder.launched()[0].manifest.cmd, "fake-worker");
    Ok(())
}
