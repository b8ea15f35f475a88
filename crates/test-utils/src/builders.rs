use std::collections::BTreeMap;

use keepwarm::config::{
    ConfigFile, DeploymentSection, KeepAliveSection, MachineSection, RawConfigFile, WorkerSection,
};
use keepwarm::environment::DeploymentEnvironment;
use keepwarm::provider::{KeepAlivePolicy, ProcessProvider, ProviderConfig};
use keepwarm::worker::{MachineResources, WorkerManifest};

use crate::fake_worker::{FakeLauncher, FakeRecorder};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(cmd: &str) -> Self {
        Self {
            config: RawConfigFile {
                keep_alive: KeepAliveSection::default(),
                worker: WorkerSection {
                    cmd: cmd.to_string(),
                    cwd: None,
                    env: BTreeMap::new(),
                    heartbeat_interval_seconds: 30,
                    graceful_shutdown_timeout_ms: 2000,
                },
                machine: MachineSection::default(),
                deployment: DeploymentSection::default(),
            },
        }
    }

    pub fn keep_alive(mut self, enabled: bool, max_execution_count: usize) -> Self {
        self.config.keep_alive = KeepAliveSection {
            enabled,
            max_execution_count,
        };
        self
    }

    pub fn worker_env(mut self, key: &str, value: &str) -> Self {
        self.config
            .worker
            .env
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn heartbeat_interval_seconds(mut self, secs: u64) -> Self {
        self.config.worker.heartbeat_interval_seconds = secs;
        self
    }

    pub fn graceful_shutdown_timeout_ms(mut self, ms: u64) -> Self {
        self.config.worker.graceful_shutdown_timeout_ms = ms;
        self
    }

    pub fn deployment(mut self, content_hash: &str, version: &str) -> Self {
        self.config.deployment = DeploymentSection {
            content_hash: content_hash.to_string(),
            version: version.to_string(),
        };
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

/// Provider settings for tests: fake manifest, default machine.
pub fn provider_config(enabled: bool, max_execution_count: usize) -> ProviderConfig {
    ProviderConfig {
        keep_alive: KeepAlivePolicy::new(enabled, max_execution_count)
            .expect("max_execution_count must be >= 1 in tests"),
        manifest: WorkerManifest::new("fake-worker"),
        machine: MachineResources::default(),
    }
}

/// Base environment with a fixed content hash and a 30 s heartbeat.
pub fn test_environment() -> DeploymentEnvironment {
    DeploymentEnvironment {
        content_hash: "hash-123".to_string(),
        deployment_version: "v1".to_string(),
        machine_name: "small-1x".to_string(),
        machine_cpu: 0.5,
        machine_memory_gb: 0.5,
        heartbeat_interval_seconds: 30,
        extra: BTreeMap::new(),
    }
}

/// A provider backed by [`FakeLauncher`], plus the recorder to inspect it.
pub fn fake_provider(
    enabled: bool,
    max_execution_count: usize,
) -> (ProcessProvider<FakeLauncher>, FakeRecorder) {
    let launcher = FakeLauncher::new();
    let recorder = launcher.recorder();
    let provider = ProcessProvider::new(
        provider_config(enabled, max_execution_count),
        launcher,
        test_environment(),
    );
    (provider, recorder)
}
