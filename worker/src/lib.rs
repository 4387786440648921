pub mod builder;
pub mod config;
pub mod engine;
pub mod error;
pub mod pipeline;
pub mod planner;
pub mod probe;
pub mod worker;

pub use builder::WorkerBuilder;
pub use config::WorkerConfig;
pub use error::{Result, WorkerErr};
pub use worker::Worker;

/// Serves a single request over the process' stdin and stdout.
///
/// Stdout carries the channel, so nothing else may be printed on it.
pub async fn serve_stdio(worker: Worker) -> Result<()> {
    let (rx, tx) = comms::channel(tokio::io::stdin(), tokio::io::stdout());
    worker.serve(rx, tx).await
}
