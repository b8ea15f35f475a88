// src/environment.rs

//! Environment assembly for new worker processes.
//!
//! Merge contract used by [`merge_environment`], lowest to highest priority:
//! 1. the base environment gathered from an [`EnvironmentSource`]
//! 2. run-scoped overrides supplied with the acquire request
//! 3. `KEEPWARM_HEARTBEAT_INTERVAL_MS`, always derived from the configured
//!    heartbeat interval in seconds

use std::collections::BTreeMap;

use crate::config::ConfigFile;

pub const HEARTBEAT_INTERVAL_VAR: &str = "KEEPWARM_HEARTBEAT_INTERVAL_MS";
pub const CONTENT_HASH_VAR: &str = "KEEPWARM_CONTENT_HASH";
pub const DEPLOYMENT_VERSION_VAR: &str = "KEEPWARM_DEPLOYMENT_VERSION";
pub const MACHINE_NAME_VAR: &str = "KEEPWARM_MACHINE_NAME";
pub const MACHINE_CPU_VAR: &str = "KEEPWARM_MACHINE_CPU";
pub const MACHINE_MEMORY_VAR: &str = "KEEPWARM_MACHINE_MEMORY";

/// Source of the environment every new worker starts from.
pub trait EnvironmentSource: Send + Sync {
    fn gather_base_environment(&self) -> BTreeMap<String, String>;

    fn heartbeat_interval_seconds(&self) -> u64;
}

/// Environment derived from the deployment and machine settings in the
/// config file.
#[derive(Debug, Clone, Default)]
pub struct DeploymentEnvironment {
    pub content_hash: String,
    pub deployment_version: String,
    pub machine_name: String,
    pub machine_cpu: f64,
    pub machine_memory_gb: f64,
    pub heartbeat_interval_seconds: u64,
    /// Extra variables from `[worker.env]`.
    pub extra: BTreeMap<String, String>,
}

impl DeploymentEnvironment {
    pub fn from_config(cfg: &ConfigFile) -> Self {
        Self {
            content_hash: cfg.deployment.content_hash.clone(),
            deployment_version: cfg.deployment.version.clone(),
            machine_name: cfg.machine.name.clone(),
            machine_cpu: cfg.machine.cpu,
            machine_memory_gb: cfg.machine.memory_gb,
            heartbeat_interval_seconds: cfg.worker.heartbeat_interval_seconds,
            extra: cfg.worker.env.clone(),
        }
    }
}

impl EnvironmentSource for DeploymentEnvironment {
    fn gather_base_environment(&self) -> BTreeMap<String, String> {
        let mut env = self.extra.clone();
        env.insert(CONTENT_HASH_VAR.to_string(), self.content_hash.clone());
        env.insert(
            DEPLOYMENT_VERSION_VAR.to_string(),
            self.deployment_version.clone(),
        );
        env.insert(MACHINE_NAME_VAR.to_string(), self.machine_name.clone());
        env.insert(MACHINE_CPU_VAR.to_string(), self.machine_cpu.to_string());
        env.insert(
            MACHINE_MEMORY_VAR.to_string(),
            self.machine_memory_gb.to_string(),
        );
        env
    }

    fn heartbeat_interval_seconds(&self) -> u64 {
        self.heartbeat_interval_seconds
    }
}

/// Layer run-scoped overrides over the base environment and add the derived
/// heartbeat variable.
pub fn merge_environment(
    base: BTreeMap<String, String>,
    overrides: &BTreeMap<String, String>,
    heartbeat_interval_seconds: u64,
) -> BTreeMap<String, String> {
    let mut env = base;
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    env.insert(
        HEARTBEAT_INTERVAL_VAR.to_string(),
        heartbeat_interval_seconds.saturating_mul(1000).to_string(),
    );
    env
}
