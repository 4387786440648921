//! GPU discovery.
//!
//! Devices are identified by their position in the discovered list, which is also the
//! affinity handed to the pipeline engine.

use std::{path::PathBuf, process::Command};

use serde::{Deserialize, Serialize};

use crate::{Result, WorkerErr};

const MIB: u64 = 1024 * 1024;

/// Memory characteristics of a single accelerator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuDescriptor {
    #[serde(default)]
    pub name: String,
    /// Total global memory in bytes.
    pub global_mem_size: u64,
    /// Largest single buffer the device accepts, in bytes.
    pub max_mem_alloc_size: u64,
}

impl GpuDescriptor {
    pub fn new(name: impl Into<String>, global_mem_size: u64, max_mem_alloc_size: u64) -> Self {
        Self {
            name: name.into(),
            global_mem_size,
            max_mem_alloc_size,
        }
    }
}

/// Lists the accelerators available to the current process.
pub trait GpuProbe: Send {
    fn list_devices(&self) -> Result<Vec<GpuDescriptor>>;
}

/// A fixed device list, usually handed over through the environment.
#[derive(Debug, Clone)]
pub struct StaticProbe {
    devices: Vec<GpuDescriptor>,
}

impl StaticProbe {
    pub fn new(devices: Vec<GpuDescriptor>) -> Self {
        Self { devices }
    }

    /// Parses a JSON array of device descriptors.
    pub fn from_json(json: &str) -> Result<Self> {
        let devices = serde_json::from_str(json)
            .map_err(|e| WorkerErr::Probe(format!("invalid device list: {e}")))?;
        Ok(Self::new(devices))
    }

    pub fn into_devices(self) -> Vec<GpuDescriptor> {
        self.devices
    }
}

impl GpuProbe for StaticProbe {
    fn list_devices(&self) -> Result<Vec<GpuDescriptor>> {
        Ok(self.devices.clone())
    }
}

/// Queries the NVIDIA driver through `nvidia-smi`.
///
/// The driver doesn't report the maximum allocation size, the OpenCL runtime caps it at a
/// quarter of the global memory so that's what gets reported.
#[derive(Debug, Clone)]
pub struct NvidiaSmiProbe {
    program: PathBuf,
}

impl NvidiaSmiProbe {
    pub fn new() -> Self {
        Self::with_program("nvidia-smi")
    }

    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl Default for NvidiaSmiProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuProbe for NvidiaSmiProbe {
    fn list_devices(&self) -> Result<Vec<GpuDescriptor>> {
        let output = Command::new(&self.program)
            .args(["--query-gpu=name,memory.total", "--format=csv,noheader,nounits"])
            .output()
            .map_err(|e| {
                WorkerErr::Probe(format!("failed to run {}: {e}", self.program.display()))
            })?;

        if !output.status.success() {
            return Err(WorkerErr::Probe(format!(
                "{} exited with {}",
                self.program.display(),
                output.status
            )));
        }

        parse_query(&String::from_utf8_lossy(&output.stdout))
    }
}

/// Parses `name, memory.total` CSV lines with the memory in MiB.
fn parse_query(output: &str) -> Result<Vec<GpuDescriptor>> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (name, total) = line
                .rsplit_once(',')
                .ok_or_else(|| WorkerErr::Probe(format!("malformed device line '{line}'")))?;

            let total_mib: u64 = total
                .trim()
                .parse()
                .map_err(|e| WorkerErr::Probe(format!("invalid memory size in '{line}': {e}")))?;

            let global_mem_size = total_mib * MIB;
            Ok(GpuDescriptor::new(name.trim(), global_mem_size, global_mem_size / 4))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_probe_reads_json() {
        let probe = StaticProbe::from_json(
            r#"[{"name": "a", "global_mem_size": 8, "max_mem_alloc_size": 2},
                {"global_mem_size": 16, "max_mem_alloc_size": 4}]"#,
        )
        .unwrap();

        let devices = probe.list_devices().unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0], GpuDescriptor::new("a", 8, 2));
        assert_eq!(devices[1].name, "");
    }

    #[test]
    fn static_probe_rejects_garbage() {
        assert!(matches!(
            StaticProbe::from_json("{\"gpus\": 2}"),
            Err(WorkerErr::Probe(_))
        ));
    }

    #[test]
    fn nvidia_smi_output_is_parsed() {
        let out = "NVIDIA A100-SXM4-40GB, 40960\nTesla V100, 16384\n\n";
        let devices = parse_query(out).unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].name, "NVIDIA A100-SXM4-40GB");
        assert_eq!(devices[0].global_mem_size, 40960 * MIB);
        assert_eq!(devices[0].max_mem_alloc_size, 10240 * MIB);
        assert_eq!(devices[1].global_mem_size, 16384 * MIB);
    }

    #[test]
    fn nvidia_smi_malformed_lines_fail() {
        assert!(parse_query("no memory here").is_err());
        assert!(parse_query("gpu, lots").is_err());
    }

    #[test]
    fn missing_nvidia_smi_is_a_probe_error() {
        let probe = NvidiaSmiProbe::with_program("/nonexistent/nvidia-smi");
        assert!(matches!(probe.list_devices(), Err(WorkerErr::Probe(_))));
    }
}
