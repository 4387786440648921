use std::{error::Error, fmt, io};

use comms::msg::FailureKind;

/// The worker module's result type.
pub type Result<T> = std::result::Result<T, WorkerErr>;

/// Failures of a single isolated unit of work.
#[derive(Debug)]
pub enum WorkerErr {
    Io(io::Error),
    /// GPU discovery failed or returned something unusable.
    Probe(String),
    /// The resolved parameters can't be planned, e.g. an empty parameter region.
    Configuration(String),
    /// The sweep doesn't fit on the discovered devices.
    Planning(String),
    /// Graph construction or execution failed inside the pipeline engine.
    Engine(String),
    /// A pass holds more chunks than there are GPUs to run them on.
    Assignment {
        pass: usize,
        chunks: usize,
        gpus: usize,
    },
    UnexpectedMessage {
        got: &'static str,
    },
}

impl WorkerErr {
    /// How the failure is reported back to the driver.
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Configuration(_) => FailureKind::Configuration,
            Self::Planning(_) => FailureKind::Planning,
            _ => FailureKind::Execution,
        }
    }
}

impl fmt::Display for WorkerErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerErr::Io(e) => write!(f, "io error: {e}"),
            WorkerErr::Probe(msg) => write!(f, "gpu discovery failed: {msg}"),
            WorkerErr::Configuration(msg) => write!(f, "invalid parameters: {msg}"),
            WorkerErr::Planning(msg) => write!(f, "planning failed: {msg}"),
            WorkerErr::Engine(msg) => write!(f, "pipeline engine error: {msg}"),
            WorkerErr::Assignment { pass, chunks, gpus } => write!(
                f,
                "pass {pass} holds {chunks} chunks but only {gpus} GPU(s) are available"
            ),
            WorkerErr::UnexpectedMessage { got } => {
                write!(f, "unexpected message: got {got}")
            }
        }
    }
}

impl Error for WorkerErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            WorkerErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WorkerErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for WorkerErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Io(value.into())
    }
}
