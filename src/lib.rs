// src/lib.rs

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod environment;
pub mod errors;
pub mod logging;
pub mod provider;
pub mod types;
pub mod worker;

use std::collections::BTreeMap;

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::cli::CliArgs;
use crate::config::ConfigFile;
use crate::config::loader::load_and_validate;
use crate::coordinator::{Coordinator, RunReport};
use crate::environment::{DeploymentEnvironment, EnvironmentSource};
use crate::provider::ProcessProvider;
use crate::types::RunOutcome;
use crate::worker::ShellLauncher;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the shell worker launcher and the process provider
/// - the sequential run coordinator
/// - Ctrl-C handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    if args.dry_run {
        print_dry_run(&cfg, &args);
        return Ok(());
    }

    if args.payloads.is_empty() {
        warn!("no payloads given; nothing to run");
        return Ok(());
    }

    let launcher = ShellLauncher::new(cfg.worker.graceful_shutdown_timeout());
    let provider = ProcessProvider::from_config(&cfg, launcher)?;
    let overrides: BTreeMap<String, String> = args.env.iter().cloned().collect();

    info!(
        runs = args.payloads.len(),
        metrics = %provider.metrics(),
        "starting runs"
    );

    let mut coordinator = Coordinator::new(provider, overrides);

    // Ctrl-C → stop after shutting the provider down.
    let stop = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            eprintln!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    let summary = coordinator
        .run_all(&args.payloads, stop, print_report)
        .await?;

    if summary.failed > 0 {
        anyhow::bail!("{} of {} runs failed", summary.failed, args.payloads.len());
    }

    Ok(())
}

/// Worker responses go to stdout, one line per run.
fn print_report(report: &RunReport) {
    match &report.outcome {
        Ok(RunOutcome::Success(line)) => println!("{line}"),
        Ok(RunOutcome::Failed(line)) => println!("{line}"),
        Err(e) => println!("ERR run {} failed: {e}", report.index),
    }
}

/// Simple dry-run output: print the settings and the environment a new
/// worker would receive.
fn print_dry_run(cfg: &ConfigFile, args: &CliArgs) {
    println!("keepwarm dry-run");
    println!("  keep_alive.enabled = {}", cfg.keep_alive.enabled);
    println!(
        "  keep_alive.max_execution_count = {}",
        cfg.keep_alive.max_execution_count
    );
    println!("  worker.cmd = {}", cfg.worker.cmd);
    if let Some(ref cwd) = cfg.worker.cwd {
        println!("  worker.cwd = {}", cwd.display());
    }
    println!(
        "  machine = {} (cpu {}, memory {} GB)",
        cfg.machine.name, cfg.machine.cpu, cfg.machine.memory_gb
    );
    println!();

    let env = DeploymentEnvironment::from_config(cfg);
    let overrides: BTreeMap<String, String> = args.env.iter().cloned().collect();
    let merged = environment::merge_environment(
        env.gather_base_environment(),
        &overrides,
        env.heartbeat_interval_seconds(),
    );

    println!("worker environment ({}):", merged.len());
    for (key, value) in merged.iter() {
        println!("  {key}={value}");
    }

    println!();
    println!("payloads ({}):", args.payloads.len());
    for payload in args.payloads.iter() {
        println!("  - {payload}");
    }

    debug!("dry-run complete (no worker started)");
}
