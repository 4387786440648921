use std::{borrow::Cow, fmt, io};

use crate::{
    Deserialize, Serialize,
    specs::{
        plan::{PassSpec, Plan},
        recon::ReconSpec,
        run::RunContext,
    },
};

type Header = u32;
const HEADER_SIZE: usize = size_of::<Header>();

const ERR_H: Header = 0;
const CONTROL_H: Header = 1;

/// Classifies why a unit of work could not be completed by a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The resolved parameters were rejected by the worker.
    Configuration,
    /// The sweep cannot be laid out on the discovered devices.
    Planning,
    /// GPU discovery, graph construction or execution failed.
    Execution,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::Configuration => "configuration",
            Self::Planning => "planning",
            Self::Execution => "execution",
        };

        f.write_str(kind)
    }
}

/// The command for the `Control` variant of the `Msg` enum.
///
/// Every worker process handles exactly one request (`Discover` or `Execute`) and
/// answers with exactly one reply (`Planned`, `Executed` or `Failed`).
#[derive(Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    Discover {
        run: RunContext,
        spec: ReconSpec,
    },
    Planned(Plan),
    Execute {
        run: RunContext,
        job: PassSpec,
    },
    Executed {
        pass: usize,
        seconds: f64,
    },
    Failed {
        kind: FailureKind,
        detail: String,
    },
}

impl Command {
    /// A short name for the command, meant for log and error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Discover { .. } => "discover",
            Self::Planned(_) => "planned",
            Self::Execute { .. } => "execute",
            Self::Executed { .. } => "executed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// The application layer message for the entire system.
#[derive(Debug)]
pub enum Msg<'a> {
    Control(Command),
    Err(Cow<'a, str>),
}

impl Msg<'_> {
    fn buf_is_too_small<T>(size: usize) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("The given buffer is too small {size}, must at least be {HEADER_SIZE} bytes"),
        ))
    }

    fn invalid_kind<T>(kind: Header) -> io::Result<T> {
        Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("Received an invalid kind header {kind}"),
        ))
    }
}

impl<'a> Serialize<'a> for Msg<'a> {
    fn serialize(&'a self, buf: &mut Vec<u8>) -> io::Result<Option<&'a [u8]>> {
        match self {
            Msg::Err(e) => {
                buf.extend_from_slice(&ERR_H.to_be_bytes());
                Ok(Some(e.as_bytes()))
            }
            Msg::Control(cmd) => {
                buf.extend_from_slice(&CONTROL_H.to_be_bytes());
                serde_json::to_writer(buf, cmd)?;
                Ok(None)
            }
        }
    }
}

impl<'a> Deserialize<'a> for Msg<'a> {
    fn deserialize(buf: &'a [u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Self::buf_is_too_small(buf.len());
        }

        let (kind_buf, rest) = buf.split_at(HEADER_SIZE);
        let mut kind = [0; HEADER_SIZE];
        kind.copy_from_slice(kind_buf);

        match Header::from_be_bytes(kind) {
            ERR_H => {
                let string = std::str::from_utf8(rest)
                    .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))?;

                Ok(Self::Err(Cow::Borrowed(string)))
            }
            CONTROL_H => {
                let cmd = serde_json::from_slice(rest)?;
                Ok(Self::Control(cmd))
            }
            other => Self::invalid_kind(other),
        }
    }
}
