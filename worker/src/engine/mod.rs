//! The pixel-level pipeline engine seam.
//!
//! The engine is string keyed: tasks are looked up by plugin name and configured through
//! dynamically typed properties. The typed side lives in `crate::pipeline`.

pub mod command;
pub mod recording;

use std::{collections::BTreeMap, fmt, time::Duration};

use comms::specs::region::Region;
use serde::{Deserialize, Serialize};

use crate::{Result, WorkerErr};

pub use command::CommandGraph;
pub use recording::RecordingGraph;

/// Handle of a task inside a single graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A task property value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Property {
    Bool(bool),
    Int(i64),
    Float(f64),
    Floats(Vec<f64>),
    Str(String),
}

impl From<bool> for Property {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<usize> for Property {
    fn from(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<f64> for Property {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Property {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Property {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Region> for Property {
    fn from(region: Region) -> Self {
        Self::Floats(<[f64; 3]>::from(region).to_vec())
    }
}

/// Builds and runs a dataflow graph of engine tasks.
pub trait TaskGraph: Send {
    /// Instantiates a new task from the plugin called `plugin`.
    fn get_task(&mut self, plugin: &str) -> Result<TaskId>;

    fn set_property(&mut self, task: TaskId, key: &str, value: Property) -> Result<()>;

    /// Feeds the output of `from` into the input `port` of `to`.
    fn connect_input(&mut self, from: TaskId, to: TaskId, port: usize) -> Result<()>;

    fn connect(&mut self, from: TaskId, to: TaskId) -> Result<()> {
        self.connect_input(from, to, 0)
    }

    /// Pins `task` to the GPU at position `gpu` of the discovered list.
    fn set_device(&mut self, task: TaskId, gpu: usize) -> Result<()>;

    /// Runs the graph to completion and returns the time spent executing it.
    fn run(&mut self) -> Result<Duration>;
}

/// A single task of a `Graph`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub plugin: String,
    pub properties: BTreeMap<String, Property>,
    pub device: Option<usize>,
}

impl Task {
    pub fn property(&self, key: &str) -> Option<&Property> {
        self.properties.get(key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub from: TaskId,
    pub to: TaskId,
    pub port: usize,
}

/// The plain description of a task graph, what engines validate or hand over to a runner.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Graph {
    tasks: Vec<Task>,
    edges: Vec<Edge>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn task(&self, id: TaskId) -> Option<&Task> {
        self.tasks.get(id.0)
    }

    /// Ids of every task instantiated from `plugin`, in creation order.
    pub fn find(&self, plugin: &str) -> Vec<TaskId> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, task)| task.plugin == plugin)
            .map(|(i, _)| TaskId(i))
            .collect()
    }

    /// The tasks feeding `id`, sorted by input port.
    pub fn inputs(&self, id: TaskId) -> Vec<TaskId> {
        let mut inputs: Vec<_> = self.edges.iter().filter(|edge| edge.to == id).collect();
        inputs.sort_by_key(|edge| edge.port);
        inputs.into_iter().map(|edge| edge.from).collect()
    }

    /// The tasks fed by `id`, in connection order.
    pub fn outputs(&self, id: TaskId) -> Vec<TaskId> {
        self.edges
            .iter()
            .filter(|edge| edge.from == id)
            .map(|edge| edge.to)
            .collect()
    }

    fn add_task(&mut self, plugin: &str) -> Result<TaskId> {
        if plugin.is_empty() {
            return Err(WorkerErr::Engine("empty plugin name".into()));
        }

        self.tasks.push(Task {
            plugin: plugin.to_string(),
            properties: BTreeMap::new(),
            device: None,
        });

        Ok(TaskId(self.tasks.len() - 1))
    }

    fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        self.tasks
            .get_mut(id.0)
            .ok_or_else(|| WorkerErr::Engine(format!("unknown task {id}")))
    }

    fn set_property(&mut self, id: TaskId, key: &str, value: Property) -> Result<()> {
        self.task_mut(id)?.properties.insert(key.to_string(), value);
        Ok(())
    }

    fn set_device(&mut self, id: TaskId, gpu: usize) -> Result<()> {
        self.task_mut(id)?.device = Some(gpu);
        Ok(())
    }

    fn add_edge(&mut self, from: TaskId, to: TaskId, port: usize) -> Result<()> {
        self.task_mut(from)?;
        self.task_mut(to)?;

        if from == to {
            return Err(WorkerErr::Engine(format!("task {from} can't feed itself")));
        }

        if self.edges.iter().any(|edge| edge.to == to && edge.port == port) {
            return Err(WorkerErr::Engine(format!(
                "input {port} of task {to} is already connected"
            )));
        }

        self.edges.push(Edge { from, to, port });
        Ok(())
    }

    /// Checks the graph can be scheduled.
    ///
    /// # Errors
    /// `Engine` if the graph is empty, has a cycle or leaves an input port unconnected
    /// while a higher one is.
    pub fn validate(&self) -> Result<()> {
        if self.tasks.is_empty() {
            return Err(WorkerErr::Engine("the graph holds no tasks".into()));
        }

        for (i, _) in self.tasks.iter().enumerate() {
            let mut ports: Vec<_> = self
                .edges
                .iter()
                .filter(|edge| edge.to.0 == i)
                .map(|edge| edge.port)
                .collect();
            ports.sort_unstable();

            if ports.iter().enumerate().any(|(expected, &port)| expected != port) {
                return Err(WorkerErr::Engine(format!(
                    "task {} has gaps in its input ports {ports:?}",
                    TaskId(i)
                )));
            }
        }

        self.check_acyclic()
    }

    // Kahn's algorithm, every task must be consumed.
    fn check_acyclic(&self) -> Result<()> {
        let mut in_degree = vec![0usize; self.tasks.len()];
        for edge in &self.edges {
            in_degree[edge.to.0] += 1;
        }

        let mut ready: Vec<_> = (0..self.tasks.len()).filter(|&i| in_degree[i] == 0).collect();
        let mut visited = 0;

        while let Some(i) = ready.pop() {
            visited += 1;
            for edge in self.edges.iter().filter(|edge| edge.from.0 == i) {
                in_degree[edge.to.0] -= 1;
                if in_degree[edge.to.0] == 0 {
                    ready.push(edge.to.0);
                }
            }
        }

        if visited != self.tasks.len() {
            return Err(WorkerErr::Engine("the graph has a cycle".into()));
        }

        Ok(())
    }
}
