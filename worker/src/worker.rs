use std::io;

use comms::{
    OnoReceiver, OnoSender,
    msg::{Command, Msg},
};
use log::{info, warn};
use tokio::io::{AsyncRead, AsyncWrite};

use crate::{
    Result, WorkerErr,
    engine::TaskGraph,
    pipeline, planner,
    probe::GpuProbe,
};

const NO_ENGINE: &str = "no engine runner configured (LAMINO_ENGINE), only dry runs can be served";

/// Runtime of an isolated worker process.
///
/// A worker answers exactly one request. The pipeline engine leaks resources between
/// runs, so the process is thrown away afterwards.
pub struct Worker {
    probe: Box<dyn GpuProbe>,
    graph: Box<dyn TaskGraph>,
    computes_pixels: bool,
}

impl Worker {
    /// Creates a new worker.
    ///
    /// # Args
    /// * `probe` - Discovers the GPUs available to this process.
    /// * `graph` - The engine passes are built on and run by.
    ///
    /// # Returns
    /// A new worker instance.
    pub fn new(probe: Box<dyn GpuProbe>, graph: Box<dyn TaskGraph>) -> Self {
        Self {
            probe,
            graph,
            computes_pixels: true,
        }
    }

    /// Marks the engine as one that only validates graphs.
    ///
    /// Such a worker refuses every request that isn't a dry run.
    pub fn validating_only(mut self) -> Self {
        self.computes_pixels = false;
        self
    }

    /// Receives a single request, handles it and replies.
    ///
    /// Failures of the request itself are reported to the driver through a `Failed` reply
    /// before being returned.
    ///
    /// # Args
    /// * `rx` - Receiving end of the driver channel.
    /// * `tx` - Sending end of the driver channel, closed once the reply is out.
    ///
    /// # Errors
    /// Returns `WorkerErr` on I/O failures, protocol violations or when the request failed.
    pub async fn serve<R, W>(self, mut rx: OnoReceiver<R>, mut tx: OnoSender<W>) -> Result<()>
    where
        R: AsyncRead + Unpin + Send,
        W: AsyncWrite + Unpin + Send,
    {
        let mut rx_buf = Vec::new();

        let outcome = match rx.recv_into(&mut rx_buf).await? {
            Msg::Control(request @ (Command::Discover { .. } | Command::Execute { .. })) => {
                tokio::task::spawn_blocking(move || self.handle(request))
                    .await
                    .map_err(|e| WorkerErr::Io(io::Error::other(e)))?
            }
            Msg::Control(other) => Err(WorkerErr::UnexpectedMessage { got: other.kind() }),
            Msg::Err(detail) => {
                warn!("driver reported an error instead of a request: {detail}");
                Err(WorkerErr::UnexpectedMessage { got: "err" })
            }
        };

        let (reply, result) = match outcome {
            Ok(reply) => (reply, Ok(())),
            Err(e) => {
                let failed = Command::Failed {
                    kind: e.failure_kind(),
                    detail: e.to_string(),
                };
                (failed, Err(e))
            }
        };

        tx.send(&Msg::Control(reply)).await?;
        tx.close().await?;

        result
    }

    fn handle(mut self, request: Command) -> Result<Command> {
        match request {
            Command::Discover { run, spec } => {
                if !self.computes_pixels && !spec.dry_run {
                    return Err(WorkerErr::Configuration(NO_ENGINE.to_string()));
                }

                let gpus = self.probe.list_devices()?;
                info!(run = run.id(); "discovered {} GPU(s)", gpus.len());

                let plan = planner::plan(&spec, &gpus, &run)?;
                Ok(Command::Planned(plan))
            }
            Command::Execute { run, job } => {
                if !self.computes_pixels && !job.spec.dry_run {
                    return Err(WorkerErr::Engine(NO_ENGINE.to_string()));
                }

                let gpus = self.probe.list_devices()?;

                let duration = pipeline::execute_pass(self.graph.as_mut(), &job, &gpus, &run)?;
                Ok(Command::Executed {
                    pass: job.pass.index,
                    seconds: duration.as_secs_f64(),
                })
            }
            other => Err(WorkerErr::UnexpectedMessage { got: other.kind() }),
        }
    }
}
