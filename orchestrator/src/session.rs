use std::{
    env,
    ffi::{OsStr, OsString},
    path::PathBuf,
    process::Stdio,
};

use comms::{
    msg::{Command, FailureKind, Msg},
    specs::{
        plan::{PassSpec, Plan},
        recon::ReconSpec,
        run::RunContext,
    },
};
use log::{debug, info};
use tokio::{process, runtime::Runtime};

use crate::{
    error::{ReconError, Result, WorkUnit},
    report::PassReport,
};

/// How worker processes are started.
#[derive(Debug, Clone)]
pub struct WorkerCommand {
    program: PathBuf,
    args: Vec<OsString>,
    envs: Vec<(OsString, OsString)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
        }
    }

    /// Re-runs the current executable in worker mode.
    pub fn current_exe() -> std::io::Result<Self> {
        Ok(Self::new(env::current_exe()?).arg("worker"))
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    /// Sets an environment variable on every spawned worker.
    pub fn env(mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> Self {
        self.envs
            .push((key.as_ref().to_os_string(), value.as_ref().to_os_string()));
        self
    }

    fn command(&self) -> process::Command {
        let mut command = process::Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);
        command
    }
}

/// Drives a reconstruction through a sequence of isolated worker processes.
///
/// At most one worker is alive at any time, the session blocks until each one exits.
pub struct Session {
    runtime: Runtime,
    command: WorkerCommand,
    run: RunContext,
}

impl Session {
    /// Creates a new `Session`.
    ///
    /// # Arguments
    /// * `command` - How to start worker processes.
    /// * `run` - The run every request belongs to.
    ///
    /// # Returns
    /// A new `Session` instance or an io error if the runtime can't be built.
    pub fn new(command: WorkerCommand, run: RunContext) -> std::io::Result<Self> {
        let runtime = Runtime::new()?;

        Ok(Self {
            runtime,
            command,
            run,
        })
    }

    /// Discovers the GPUs and plans the reconstruction inside a discovery worker.
    ///
    /// # Errors
    /// `Configuration` or `Planning` when the worker rejects the parameters, `Worker` when the
    /// worker fails.
    pub fn plan(&self, spec: &ReconSpec) -> Result<Plan> {
        let request = Command::Discover {
            run: self.run.clone(),
            spec: spec.clone(),
        };

        match self.call(WorkUnit::Discovery, request)? {
            Command::Planned(plan) => {
                info!(
                    run = self.run.id();
                    "planned {} chunk(s) of {} slice(s) in {} pass(es)",
                    plan.num_chunks(),
                    plan.slices_per_device,
                    plan.passes.len()
                );
                Ok(plan)
            }
            other => Err(ReconError::worker(
                WorkUnit::Discovery,
                format!("expected a plan, got {}", other.kind()),
            )),
        }
    }

    /// Runs every pass of `plan` in its own worker, in order.
    ///
    /// # Returns
    /// One report per pass.
    ///
    /// # Errors
    /// Stops at the first failing pass.
    pub fn execute(&self, spec: &ReconSpec, plan: &Plan) -> Result<Vec<PassReport>> {
        let total = plan.passes.len();
        let mut reports = Vec::with_capacity(total);

        for pass in &plan.passes {
            let unit = WorkUnit::Pass(pass.index);
            info!(
                run = self.run.id(), pass = pass.index;
                "starting pass {}/{total} with {} chunk(s)",
                pass.index + 1,
                pass.chunks.len()
            );

            let request = Command::Execute {
                run: self.run.clone(),
                job: PassSpec::new(spec.clone(), plan, pass.clone()),
            };

            let report = match self.call(unit, request)? {
                Command::Executed { pass: index, seconds } if index == pass.index => PassReport {
                    pass: index,
                    seconds,
                },
                Command::Executed { pass: index, .. } => {
                    return Err(ReconError::worker(
                        unit,
                        format!("reported pass {index} instead"),
                    ));
                }
                other => {
                    return Err(ReconError::worker(
                        unit,
                        format!("expected an execution report, got {}", other.kind()),
                    ));
                }
            };

            info!(run = self.run.id(), pass = pass.index; "pass took {:.3} s", report.seconds);
            reports.push(report);
        }

        Ok(reports)
    }

    fn call(&self, unit: WorkUnit, request: Command) -> Result<Command> {
        self.runtime
            .block_on(call(&self.command, unit, Msg::Control(request)))
    }
}

/// Spawns one worker, hands it `request` and waits for both its reply and its exit.
async fn call(command: &WorkerCommand, unit: WorkUnit, request: Msg<'_>) -> Result<Command> {
    let mut child = command
        .command()
        .spawn()
        .map_err(|e| ReconError::worker(unit, format!("failed to spawn: {e}")))?;

    let name = unit.to_string();
    debug!(unit = name.as_str(), pid = child.id().unwrap_or_default(); "worker spawned");

    let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
        return Err(ReconError::worker(unit, "worker stdio is not piped"));
    };

    let (mut rx, mut tx) = comms::channel(stdout, stdin);

    let sent = match tx.send(&request).await {
        Ok(()) => tx.close().await,
        Err(e) => Err(e),
    };

    let mut rx_buf = Vec::new();
    let reply = match sent {
        Ok(()) => rx.recv_into::<Msg>(&mut rx_buf).await,
        Err(e) => Err(e),
    };

    let status = child
        .wait()
        .await
        .map_err(|e| ReconError::worker(unit, format!("failed to wait for the worker: {e}")))?;

    debug!(unit = name.as_str(); "worker exited with {status}");

    match reply {
        Ok(Msg::Control(Command::Failed { kind, detail })) => Err(match kind {
            FailureKind::Configuration => ReconError::Configuration(detail),
            FailureKind::Planning => ReconError::Planning(detail),
            FailureKind::Execution => ReconError::worker(unit, detail),
        }),
        Ok(Msg::Control(reply)) if status.success() => Ok(reply),
        Ok(Msg::Control(reply)) => Err(ReconError::worker(
            unit,
            format!("exited with {status} after replying {}", reply.kind()),
        )),
        Ok(Msg::Err(detail)) => Err(ReconError::worker(unit, detail.into_owned())),
        Err(e) => Err(ReconError::worker(
            unit,
            format!("no reply ({e}), exited with {status}"),
        )),
    }
}
