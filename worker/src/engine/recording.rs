use std::time::{Duration, Instant};

use log::debug;

use super::{Graph, Property, TaskGraph, TaskId};
use crate::Result;

/// An engine that validates and records graphs without computing any pixels.
///
/// Used for dry runs on machines without an engine runner and by the tests.
#[derive(Debug, Default)]
pub struct RecordingGraph {
    graph: Graph,
    runs: usize,
}

impl RecordingGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// The graph built so far.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Amount of successful runs.
    pub fn runs(&self) -> usize {
        self.runs
    }
}

impl TaskGraph for RecordingGraph {
    fn get_task(&mut self, plugin: &str) -> Result<TaskId> {
        self.graph.add_task(plugin)
    }

    fn set_property(&mut self, task: TaskId, key: &str, value: Property) -> Result<()> {
        self.graph.set_property(task, key, value)
    }

    fn connect_input(&mut self, from: TaskId, to: TaskId, port: usize) -> Result<()> {
        self.graph.add_edge(from, to, port)
    }

    fn set_device(&mut self, task: TaskId, gpu: usize) -> Result<()> {
        self.graph.set_device(task, gpu)
    }

    fn run(&mut self) -> Result<Duration> {
        let start = Instant::now();
        self.graph.validate()?;
        self.runs += 1;

        debug!(
            tasks = self.graph.tasks().len(),
            edges = self.graph.edges().len();
            "recorded graph"
        );

        Ok(start.elapsed())
    }
}
