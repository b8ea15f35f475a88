// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [keep_alive]
/// enabled = true
/// max_execution_count = 10
///
/// [worker]
/// cmd = "python worker.py"
/// heartbeat_interval_seconds = 30
///
/// [worker.env]
/// LOG_FORMAT = "json"
///
/// [machine]
/// name = "small-1x"
/// cpu = 0.5
/// memory_gb = 0.5
///
/// [deployment]
/// content_hash = "a1b2c3"
/// version = "20240101.1"
/// ```
///
/// Only `[worker].cmd` is required; everything else has defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub keep_alive: KeepAliveSection,

    pub worker: WorkerSection,

    #[serde(default)]
    pub machine: MachineSection,

    #[serde(default)]
    pub deployment: DeploymentSection,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (see `validate.rs`), so
/// holders can rely on `max_execution_count >= 1`, a non-empty command and
/// positive machine limits.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub keep_alive: KeepAliveSection,
    pub worker: WorkerSection,
    pub machine: MachineSection,
    pub deployment: DeploymentSection,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(raw: RawConfigFile) -> Self {
        Self {
            keep_alive: raw.keep_alive,
            worker: raw.worker,
            machine: raw.machine,
            deployment: raw.deployment,
        }
    }
}

/// `[keep_alive]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct KeepAliveSection {
    /// Retain the worker process between runs.
    #[serde(default)]
    pub enabled: bool,

    /// How many runs a single retained process may serve before it is
    /// replaced.
    #[serde(default = "default_max_execution_count")]
    pub max_execution_count: usize,
}

fn default_max_execution_count() -> usize {
    50
}

impl Default for KeepAliveSection {
    fn default() -> Self {
        Self {
            enabled: false,
            max_execution_count: default_max_execution_count(),
        }
    }
}

/// `[worker]` section: how to start a worker process.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerSection {
    /// Shell command that starts the worker.
    pub cmd: String,

    /// Working directory; defaults to the current one.
    #[serde(default)]
    pub cwd: Option<PathBuf>,

    /// Extra variables for the base environment.
    #[serde(default)]
    pub env: BTreeMap<String, String>,

    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,

    /// Grace period for `TerminationSignal::Graceful` before the process is
    /// killed.
    #[serde(default = "default_graceful_shutdown_timeout_ms")]
    pub graceful_shutdown_timeout_ms: u64,
}

fn default_heartbeat_interval_seconds() -> u64 {
    30
}

fn default_graceful_shutdown_timeout_ms() -> u64 {
    2000
}

impl WorkerSection {
    pub fn graceful_shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.graceful_shutdown_timeout_ms)
    }
}

/// `[machine]` section: resource limits advertised to the worker.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineSection {
    #[serde(default = "default_machine_name")]
    pub name: String,

    #[serde(default = "default_cpu")]
    pub cpu: f64,

    #[serde(default = "default_memory_gb")]
    pub memory_gb: f64,
}

fn default_machine_name() -> String {
    "small-1x".to_string()
}

fn default_cpu() -> f64 {
    0.5
}

fn default_memory_gb() -> f64 {
    0.5
}

impl Default for MachineSection {
    fn default() -> Self {
        Self {
            name: default_machine_name(),
            cpu: default_cpu(),
            memory_gb: default_memory_gb(),
        }
    }
}

/// `[deployment]` section.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeploymentSection {
    #[serde(default)]
    pub content_hash: String,

    #[serde(default)]
    pub version: String,
}
