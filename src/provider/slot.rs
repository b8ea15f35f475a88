// src/provider/slot.rs

//! Pure retained-slot state machine.
//!
//! `RetainedSlot` holds at most one warm worker handle plus the number of
//! runs it has completed. It makes every keep-alive decision synchronously
//! and never touches processes: discarded handles are handed back to the
//! caller (`ProcessProvider`), which owns termination.
//!
//! States:
//! - Empty: `process == None`, `execution_count == 0`.
//! - Retained: `process == Some(_)`, `execution_count >= 1`.

use std::fmt;
use std::sync::Arc;

use crate::errors::{KeepwarmError, Result};
use crate::worker::WorkerProcess;

/// Keep-alive policy. Immutable once the provider is built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAlivePolicy {
    enabled: bool,
    max_execution_count: usize,
}

impl KeepAlivePolicy {
    /// `max_execution_count` must be at least 1.
    pub fn new(enabled: bool, max_execution_count: usize) -> Result<Self> {
        if max_execution_count == 0 {
            return Err(KeepwarmError::ConfigError(
                "max_execution_count must be >= 1 (got 0)".to_string(),
            ));
        }
        Ok(Self {
            enabled,
            max_execution_count,
        })
    }

    /// Never retain processes.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_execution_count: 1,
        }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn max_execution_count(&self) -> usize {
        self.max_execution_count
    }
}

/// Why `acquire` has to construct a new process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceReason {
    KeepAliveDisabled,
    Empty,
    Unhealthy,
    LimitReached,
}

impl fmt::Display for ReplaceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReplaceReason::KeepAliveDisabled => "keep-alive disabled",
            ReplaceReason::Empty => "no retained process",
            ReplaceReason::Unhealthy => "retained process is not reusable",
            ReplaceReason::LimitReached => "retained process reached max execution count",
        };
        f.write_str(s)
    }
}

/// Outcome of [`RetainedSlot::plan_acquire`].
pub enum AcquirePlan<W> {
    /// Hand out the retained process again. The slot is unchanged.
    Reuse(Arc<W>),
    /// Start a new process. The slot has already been cleared; `discarded`
    /// is the previously retained process, which must be terminated.
    Replace {
        discarded: Option<Arc<W>>,
        reason: ReplaceReason,
    },
}

/// Outcome of [`RetainedSlot::offer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseDecision {
    Retained { execution_count: usize },
    KeepAliveDisabled,
    LimitReached,
    Unhealthy,
}

pub struct RetainedSlot<W> {
    process: Option<Arc<W>>,
    execution_count: usize,
}

impl<W> fmt::Debug for RetainedSlot<W> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetainedSlot")
            .field("has_process", &self.process.is_some())
            .field("execution_count", &self.execution_count)
            .finish()
    }
}

impl<W> Default for RetainedSlot<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W> RetainedSlot<W> {
    pub fn new() -> Self {
        Self {
            process: None,
            execution_count: 0,
        }
    }

    pub fn execution_count(&self) -> usize {
        self.execution_count
    }

    pub fn is_empty(&self) -> bool {
        self.process.is_none()
    }

    pub fn process(&self) -> Option<&Arc<W>> {
        self.process.as_ref()
    }

    /// Clear the slot, returning the retained process if there was one.
    pub fn take(&mut self) -> Option<Arc<W>> {
        self.execution_count = 0;
        self.process.take()
    }
}

impl<W: WorkerProcess> RetainedSlot<W> {
    /// Decide whether the next run can use the retained process.
    ///
    /// Reuse requires keep-alive, a retained process that is reusable, and
    /// an execution count below the limit. Anything else clears the slot.
    /// The count is never incremented here.
    pub fn plan_acquire(&mut self, policy: KeepAlivePolicy) -> AcquirePlan<W> {
        let reason = match &self.process {
            _ if !policy.enabled => ReplaceReason::KeepAliveDisabled,
            None => ReplaceReason::Empty,
            Some(process) if !process.is_reusable() => ReplaceReason::Unhealthy,
            Some(_) if self.execution_count >= policy.max_execution_count => {
                ReplaceReason::LimitReached
            }
            Some(process) => return AcquirePlan::Reuse(Arc::clone(process)),
        };

        AcquirePlan::Replace {
            discarded: self.take(),
            reason,
        }
    }

    /// Decide whether a handle returned after a run should be kept warm.
    ///
    /// Only the offered handle is considered: when it is not retained, the
    /// slot keeps whatever it held before.
    pub fn offer(&mut self, handle: Arc<W>, policy: KeepAlivePolicy) -> ReleaseDecision {
        if !policy.enabled {
            return ReleaseDecision::KeepAliveDisabled;
        }
        if self.execution_count >= policy.max_execution_count {
            return ReleaseDecision::LimitReached;
        }
        if !handle.is_reusable() {
            return ReleaseDecision::Unhealthy;
        }

        self.process = Some(handle);
        self.execution_count += 1;
        ReleaseDecision::Retained {
            execution_count: self.execution_count,
        }
    }
}
