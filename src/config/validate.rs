// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{KeepwarmError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::KeepwarmError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    validate_keep_alive(cfg)?;
    validate_worker(cfg)?;
    validate_machine(cfg)?;
    Ok(())
}

fn validate_keep_alive(cfg: &RawConfigFile) -> Result<()> {
    if cfg.keep_alive.max_execution_count == 0 {
        return Err(KeepwarmError::ConfigError(
            "[keep_alive].max_execution_count must be >= 1 (got 0)".to_string(),
        ));
    }
    Ok(())
}

fn validate_worker(cfg: &RawConfigFile) -> Result<()> {
    if cfg.worker.cmd.trim().is_empty() {
        return Err(KeepwarmError::ConfigError(
            "[worker].cmd must not be empty".to_string(),
        ));
    }

    if cfg.worker.heartbeat_interval_seconds == 0 {
        return Err(KeepwarmError::ConfigError(
            "[worker].heartbeat_interval_seconds must be >= 1 (got 0)".to_string(),
        ));
    }

    for key in cfg.worker.env.keys() {
        if key.is_empty() || key.contains('=') {
            return Err(KeepwarmError::ConfigError(format!(
                "[worker.env] has invalid variable name '{}'",
                key
            )));
        }
    }

    Ok(())
}

fn validate_machine(cfg: &RawConfigFile) -> Result<()> {
    // NaN fails both comparisons, so use a positive check.
    if !(cfg.machine.cpu > 0.0) {
        return Err(KeepwarmError::ConfigError(format!(
            "[machine].cpu must be > 0 (got {})",
            cfg.machine.cpu
        )));
    }

    if !(cfg.machine.memory_gb > 0.0) {
        return Err(KeepwarmError::ConfigError(format!(
            "[machine].memory_gb must be > 0 (got {})",
            cfg.machine.memory_gb
        )));
    }

    Ok(())
}
