// src/provider/metrics.rs

use std::fmt;

/// Read-only snapshot of a provider's keep-alive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderMetrics {
    pub enabled: bool,
    pub execution_count: usize,
    pub max_execution_count: usize,
    pub has_retained_process: bool,
}

impl fmt::Display for ProviderMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "keep_alive={} executions={}/{} retained={}",
            self.enabled, self.execution_count, self.max_execution_count, self.has_retained_process
        )
    }
}
