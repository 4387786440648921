use std::{fmt, io};

/// A unit of work handed to an isolated worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkUnit {
    /// GPU discovery and planning.
    Discovery,
    /// The pass with the given index.
    Pass(usize),
}

impl fmt::Display for WorkUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Discovery => f.write_str("discovery"),
            Self::Pass(index) => write!(f, "pass {index}"),
        }
    }
}

/// All errors that can end a reconstruction run.
#[derive(Debug)]
pub enum ReconError {
    /// Invalid or unresolvable parameters, caught before any worker is spawned.
    Configuration(String),
    /// The sweep can't be laid out on the discovered devices.
    Planning(String),
    /// A worker process failed to deliver its unit of work.
    Worker { unit: WorkUnit, detail: String },
    /// An underlying I/O error not covered by the above variants.
    Io(io::Error),
}

impl ReconError {
    pub(crate) fn worker(unit: WorkUnit, detail: impl Into<String>) -> Self {
        Self::Worker {
            unit,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for ReconError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration(msg) => write!(f, "invalid configuration: {msg}"),
            Self::Planning(msg) => write!(f, "planning failed: {msg}"),
            Self::Worker { unit, detail } => write!(f, "{unit} worker failed: {detail}"),
            Self::Io(e) => write!(f, "io error: {e}"),
        }
    }
}

impl std::error::Error for ReconError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ReconError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// The orchestrator module's result type.
pub type Result<T> = std::result::Result<T, ReconError>;
