use serde::{Deserialize, Serialize};

use super::{recon::ReconSpec, region::Region};

/// One concurrent wave of chunks, one chunk per GPU, run inside a single worker process.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pass {
    pub index: usize,
    pub chunks: Vec<Region>,
}

impl Pass {
    /// The sweep coordinates covered by this pass, `None` when it holds no chunks.
    pub fn span(&self) -> Option<(f64, f64)> {
        let first = self.chunks.first()?;
        let last = self.chunks.last()?;
        Some((first.start, last.stop))
    }
}

/// The layout of a whole reconstruction over the discovered GPUs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub x_region: Region,
    pub y_region: Region,
    pub slices_per_device: usize,
    /// Amount of GPUs discovered while planning.
    pub num_gpus: usize,
    pub passes: Vec<Pass>,
}

impl Plan {
    pub fn num_chunks(&self) -> usize {
        self.passes.iter().map(|pass| pass.chunks.len()).sum()
    }

    /// Amount of GPUs that will actually receive work.
    pub fn gpus_used(&self) -> usize {
        self.num_chunks().min(self.num_gpus)
    }
}

/// Everything an execution worker needs to run one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassSpec {
    pub spec: ReconSpec,
    pub x_region: Region,
    pub y_region: Region,
    pub num_gpus: usize,
    pub pass: Pass,
}

impl PassSpec {
    pub fn new(spec: ReconSpec, plan: &Plan, pass: Pass) -> Self {
        Self {
            spec,
            x_region: plan.x_region,
            y_region: plan.y_region,
            num_gpus: plan.num_gpus,
            pass,
        }
    }

    /// Global index of the `branch`-th chunk of this pass, used to name its output files.
    pub fn branch_index(&self, branch: usize) -> usize {
        self.pass.index * self.num_gpus + branch
    }
}
