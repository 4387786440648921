use comms::specs::{plan::Plan, run::RunContext};
use serde::Serialize;

/// The outcome of a single pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PassReport {
    pub pass: usize,
    /// Time the engine spent executing the pass.
    pub seconds: f64,
}

/// The outcome of a whole reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run: RunContext,
    pub plan: Plan,
    pub passes: Vec<PassReport>,
}

impl RunReport {
    pub fn new(run: RunContext, plan: Plan, passes: Vec<PassReport>) -> Self {
        Self { run, plan, passes }
    }

    /// Engine time summed over every pass.
    pub fn total_seconds(&self) -> f64 {
        self.passes.iter().map(|pass| pass.seconds).sum()
    }
}
