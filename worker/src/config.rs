use std::{env, path::PathBuf};

use crate::{
    Result,
    probe::{GpuDescriptor, StaticProbe},
};

/// JSON array of `GpuDescriptor`s replacing the driver query.
pub const GPUS_VAR: &str = "LAMINO_GPUS";

/// Path of the engine runner program.
pub const ENGINE_VAR: &str = "LAMINO_ENGINE";

/// Environment provided settings of a worker process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkerConfig {
    gpus: Option<Vec<GpuDescriptor>>,
    engine: Option<PathBuf>,
}

impl WorkerConfig {
    /// Creates a new worker configuration.
    ///
    /// # Args
    /// * `gpus` - A fixed device list, the driver is queried when `None`.
    /// * `engine` - The engine runner, graphs are only validated when `None`.
    ///
    /// # Returns
    /// A `WorkerConfig` instance.
    pub fn new(gpus: Option<Vec<GpuDescriptor>>, engine: Option<PathBuf>) -> Self {
        Self { gpus, engine }
    }

    /// Reads the configuration from the process environment.
    ///
    /// # Errors
    /// `Probe` if `LAMINO_GPUS` is not a valid device list.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| env::var(key).ok())
    }

    /// Reads the configuration through `lookup`, empty values count as unset.
    pub fn from_vars<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let gpus = var(GPUS_VAR)
            .map(|json| StaticProbe::from_json(&json).map(StaticProbe::into_devices))
            .transpose()?;

        Ok(Self::new(gpus, var(ENGINE_VAR).map(PathBuf::from)))
    }

    pub fn gpus(&self) -> Option<&[GpuDescriptor]> {
        self.gpus.as_deref()
    }

    pub fn engine(&self) -> Option<&PathBuf> {
        self.engine.as_ref()
    }
}
