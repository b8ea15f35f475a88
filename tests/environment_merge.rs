// tests/environment_merge.rs

use std::collections::BTreeMap;

use keepwarm::environment::{
    CONTENT_HASH_VAR, DeploymentEnvironment, EnvironmentSource, HEARTBEAT_INTERVAL_VAR,
    MACHINE_CPU_VAR, MACHINE_NAME_VAR, merge_environment,
};
use keepwarm_test_utils::builders::ConfigFileBuilder;

fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test]
fn overrides_win_over_base() {
    let base = map(&[("A", "base"), ("B", "base")]);
    let overrides = map(&[("B", "override"), ("C", "new")]);

    let env = merge_environment(base, &overrides, 5);

    assert_eq!(env.get("A").map(String::as_str), Some("base"));
    assert_eq!(env.get("B").map(String::as_str), Some("override"));
    assert_eq!(env.get("C").map(String::as_str), Some("new"));
}

#[test]
fn heartbeat_is_derived_in_milliseconds_and_always_wins() {
    let overrides = map(&[(HEARTBEAT_INTERVAL_VAR, "1")]);

    let env = merge_environment(BTreeMap::new(), &overrides, 45);

    assert_eq!(
        env.get(HEARTBEAT_INTERVAL_VAR).map(String::as_str),
        Some("45000")
    );
}

#[test]
fn deployment_environment_reads_config() {
    let cfg = ConfigFileBuilder::new("worker")
        .worker_env("LOG_FORMAT", "json")
        .deployment("abc123", "20240101.1")
        .heartbeat_interval_seconds(12)
        .build();

    let source = DeploymentEnvironment::from_config(&cfg);
    let base = source.gather_base_environment();

    assert_eq!(base.get("LOG_FORMAT").map(String::as_str), Some("json"));
    assert_eq!(base.get(CONTENT_HASH_VAR).map(String::as_str), Some("abc123"));
    assert_eq!(base.get(MACHINE_NAME_VAR).map(String::as_str), Some("small-1x"));
    assert_eq!(base.get(MACHINE_CPU_VAR).map(String::as_str), Some("0.5"));
    assert!(!base.contains_key(HEARTBEAT_INTERVAL_VAR));
    assert_eq!(source.heartbeat_interval_seconds(), 12);
}
