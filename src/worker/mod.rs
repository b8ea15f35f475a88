// src/worker/mod.rs

//! Worker process layer.
//!
//! - [`backend`] defines the `WorkerProcess`, `RunExecutor` and
//!   `WorkerLauncher` traits the provider and coordinator are written
//!   against, plus the options handed to a launcher.
//! - [`shell`] provides `ShellLauncher` / `ShellWorker`, the production
//!   implementation built on `tokio::process`.

pub mod backend;
pub mod shell;

pub use backend::{
    BoxFuture, MachineResources, RunExecutor, WorkerLauncher, WorkerManifest, WorkerOptions,
    WorkerProcess,
};
pub use shell::{ShellLauncher, ShellWorker};
