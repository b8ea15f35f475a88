// src/main.rs

//! `keepwarm` binary: parse arguments, set up logging, run the payloads.
//! Any error, including a failed run, exits with status 1.

use keepwarm::{cli, logging, run};

#[tokio::main]
async fn main() {
    if let Err(err) = run_main().await {
        eprintln!("keepwarm error: {err:?}");
        std::process::exit(1);
    }
}

async fn run_main() -> anyhow::Result<()> {
    let args = cli::parse();
    logging::init_logging(args.log_level)?;
    run(args).await
}
