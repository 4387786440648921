use std::{
    io::Write,
    path::PathBuf,
    process::{Command, Stdio},
    time::Duration,
};

use log::debug;

use super::{Graph, Property, TaskGraph, TaskId};
use crate::{Result, WorkerErr};

/// Hands the finished graph over to an external engine runner.
///
/// The runner receives the graph as JSON on its stdin, executes it and prints the amount
/// of seconds the execution took on its stdout.
#[derive(Debug)]
pub struct CommandGraph {
    program: PathBuf,
    args: Vec<String>,
    graph: Graph,
}

impl CommandGraph {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            graph: Graph::new(),
        }
    }

    /// Appends arguments passed to the runner on every run.
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn runner_err(&self, detail: impl std::fmt::Display) -> WorkerErr {
        WorkerErr::Engine(format!("runner {}: {detail}", self.program.display()))
    }
}

impl TaskGraph for CommandGraph {
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
        self.graph.validate()?;
        let json = serde_json::to_vec(&self.graph)?;

        let runner = self.program.display().to_string();
        debug!(runner = runner.as_str(), bytes = json.len(); "handing graph over");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|e| self.runner_err(format!("failed to start: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&json)
                .map_err(|e| self.runner_err(format!("failed to send the graph: {e}")))?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(self.runner_err(format!("exited with {}", output.status)));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let seconds: f64 = stdout
            .trim()
            .parse()
            .map_err(|e| self.runner_err(format!("invalid duration '{}': {e}", stdout.trim())))?;

        Duration::try_from_secs_f64(seconds)
            .map_err(|e| self.runner_err(format!("invalid duration {seconds}: {e}")))
    }
}
