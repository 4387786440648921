pub mod configs;
pub mod error;
pub mod report;
pub mod resolver;
mod session;

use comms::specs::run::RunContext;
use log::info;

use configs::ReconstructionConfig;
use resolver::{FsProbe, InputProbe};

pub use error::{ReconError, Result, WorkUnit};
pub use report::{PassReport, RunReport};
pub use session::{Session, WorkerCommand};

/// Runs a whole reconstruction, reading the projections from the local filesystem.
///
/// # Errors
/// Returns a `ReconError` if the parameters can't be resolved, the plan doesn't fit on
/// the GPUs or any worker fails. Passes completed before the failure are not reported.
pub fn reconstruct(config: &ReconstructionConfig, command: WorkerCommand) -> Result<RunReport> {
    reconstruct_with(config, &FsProbe, command)
}

/// Runs a whole reconstruction, probing the input through `probe`.
///
/// Resolution happens before any worker is spawned, then a discovery worker plans the
/// run and one execution worker runs each pass.
pub fn reconstruct_with<P: InputProbe + ?Sized>(
    config: &ReconstructionConfig,
    probe: &P,
    command: WorkerCommand,
) -> Result<RunReport> {
    let run = RunContext::new();
    info!(run = run.id(); "resolving parameters");

    let spec = resolver::resolve(config, probe, &run)?;

    let session = Session::new(command, run.clone())?;
    let plan = session.plan(&spec)?;
    let passes = session.execute(&spec, &plan)?;

    let report = RunReport::new(run, plan, passes);
    info!(
        run = report.run.id();
        "reconstructed {} pass(es) in {:.3} s",
        report.passes.len(),
        report.total_seconds()
    );

    Ok(report)
}
