use log::debug;

use crate::{
    Worker,
    config::WorkerConfig,
    engine::{CommandGraph, RecordingGraph, TaskGraph},
    probe::{GpuProbe, NvidiaSmiProbe, StaticProbe},
};

pub struct WorkerBuilder;

impl WorkerBuilder {
    /// Builds a `Worker` from its environment configuration.
    ///
    /// # Args
    /// * `config` - The process' worker configuration.
    ///
    /// # Returns
    /// A fully initialized `Worker` instance.
    pub fn build(config: WorkerConfig) -> Worker {
        let probe: Box<dyn GpuProbe> = match config.gpus() {
            Some(gpus) => {
                debug!(gpus = gpus.len(); "using a static device list");
                Box::new(StaticProbe::new(gpus.to_vec()))
            }
            None => Box::new(NvidiaSmiProbe::new()),
        };

        match config.engine() {
            Some(runner) => {
                let graph: Box<dyn TaskGraph> = Box::new(CommandGraph::new(runner));
                Worker::new(probe, graph)
            }
            None => Worker::new(probe, Box::new(RecordingGraph::new())).validating_only(),
        }
    }
}
