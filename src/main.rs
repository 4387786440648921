use std::{env, process};

use anyhow::Context;
use log::{error, info};

use orchestrator::{WorkerCommand, configs};
use worker::{WorkerBuilder, WorkerConfig};

fn usage(program: &str) -> ! {
    eprintln!("Usage: {program} <run <config.json>|worker>");
    process::exit(2);
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    // Read the arguments to determine if it's the driver or a worker
    let args: Vec<String> = env::args().collect();
    let program = args.first().map(String::as_str).unwrap_or("lamino");

    match args.get(1).map(String::as_str) {
        Some("run") => {
            let Some(path) = args.get(2) else {
                usage(program);
            };
            run(path)
        }
        Some("worker") => serve(),
        Some(mode) => {
            eprintln!("Unknown mode: {mode}. You must use 'run' or 'worker'.");
            usage(program);
        }
        None => usage(program),
    }
}

fn run(path: &str) -> anyhow::Result<()> {
    let config = configs::load(path)?;
    let command = WorkerCommand::current_exe().context("can't locate the lamino executable")?;

    let report = orchestrator::reconstruct(&config, command)?;
    info!(
        run = report.run.id();
        "done, {} pass(es) took {:.3} s",
        report.passes.len(),
        report.total_seconds()
    );

    Ok(())
}

fn serve() -> anyhow::Result<()> {
    let config = WorkerConfig::from_env()?;
    let worker = WorkerBuilder::build(config);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(worker::serve_stdio(worker)).inspect_err(|e| {
        error!("worker failed: {e}");
    })?;

    Ok(())
}
