// src/provider/mod.rs

//! Warm worker process reuse.
//!
//! - [`slot`] is the synchronous keep-alive state machine; it can be tested
//!   without Tokio or processes.
//! - [`process_provider`] wraps it with process launch and background
//!   termination.
//! - [`metrics`] is the read-only snapshot type.

pub mod metrics;
pub mod process_provider;
pub mod slot;

pub use metrics::ProviderMetrics;
pub use process_provider::{AcquireRequest, COMPONENT, ProcessProvider, ProviderConfig};
pub use slot::{AcquirePlan, KeepAlivePolicy, ReleaseDecision, ReplaceReason, RetainedSlot};
