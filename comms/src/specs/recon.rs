use std::{
    fmt,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

use super::region::Region;

/// The reconstruction parameter varied across the parameter region.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SweepParameter {
    /// Slice position along the rotation axis.
    #[default]
    Z,
    LaminoAngle,
    RollAngle,
}

impl SweepParameter {
    /// The name the backprojector knows this parameter by.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Z => "z",
            Self::LaminoAngle => "lamino-angle",
            Self::RollAngle => "roll-angle",
        }
    }

    /// Whether the parameter region is expressed in degrees.
    pub fn is_angular(&self) -> bool {
        matches!(self, Self::LaminoAngle | Self::RollAngle)
    }
}

impl FromStr for SweepParameter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "z" => Ok(Self::Z),
            "lamino-angle" => Ok(Self::LaminoAngle),
            "roll-angle" => Ok(Self::RollAngle),
            other => Err(format!(
                "unknown sweep parameter '{other}', expected one of z, lamino-angle, roll-angle"
            )),
        }
    }
}

impl fmt::Display for SweepParameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully resolved reconstruction parameters.
///
/// Built once by the driver and handed read-only to every worker process. Angles are in
/// degrees, sizes in pixels. Regions left as `None` take their centered default at planning
/// time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconSpec {
    pub input: PathBuf,
    pub darks: Option<PathBuf>,
    pub flats: Option<PathBuf>,
    /// Output prefix, slice files are written as `{output}-{branch:03}-%04i.tif`.
    pub output: String,
    pub overall_angle: f64,
    /// Angle between two consecutive projections.
    pub angle: f64,
    /// Projection sub-sampling step.
    pub projection_step: usize,
    pub number: usize,
    pub width: usize,
    pub height: usize,
    /// Vertical offset of the first projection row to read.
    pub y: usize,
    /// Center of rotation.
    pub axis: f64,
    pub lamino_angle: f64,
    pub roll_angle: f64,
    /// Fixed z coordinate, used when sweeping over an angle.
    pub z: f64,
    pub z_parameter: SweepParameter,
    pub x_region: Option<Region>,
    pub y_region: Option<Region>,
    pub region: Option<Region>,
    pub slices_per_device: Option<NonZeroUsize>,
    pub dry_run: bool,
}

impl ReconSpec {
    /// The dark and flat field paths, when projections are flat-field corrected.
    pub fn flat_field(&self) -> Option<(&Path, &Path)> {
        self.darks.as_deref().zip(self.flats.as_deref())
    }
}
