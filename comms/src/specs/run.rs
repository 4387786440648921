use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifies one reconstruction run across the driver and every worker process it spawns.
///
/// It's threaded explicitly through resolution, planning and execution so that all log
/// records of a run can be correlated through their `run` key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    id: String,
}

impl RunContext {
    /// Creates a context with a fresh random id.
    pub fn new() -> Self {
        let id: u32 = rand::random();
        Self::with_id(format!("{id:08x}"))
    }

    pub fn with_id(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}
