use std::path::PathBuf;

use comms::specs::{recon::ReconSpec, region::Region};
use serde::{Deserialize, Deserializer, Serialize};

/// User facing reconstruction parameters, every unset field is resolved from the input data.
///
/// Angles are in degrees. Regions are `[start, stop, step]` triples, a `stop` of `-1`
/// leaves the region at its default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReconstructionConfig {
    /// Projection directory or single file.
    pub input: PathBuf,
    pub darks: Option<PathBuf>,
    pub flats: Option<PathBuf>,
    pub output: String,
    pub overall_angle: Option<f64>,
    pub angle: Option<f64>,
    /// Projection sub-sampling step.
    pub step: usize,
    pub number: Option<usize>,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub y: usize,
    pub axis: Option<f64>,
    pub lamino_angle: Option<f64>,
    pub roll_angle: f64,
    pub z: f64,
    pub z_parameter: String,
    #[serde(deserialize_with = "deserialize_region")]
    pub x_region: Option<Region>,
    #[serde(deserialize_with = "deserialize_region")]
    pub y_region: Option<Region>,
    #[serde(deserialize_with = "deserialize_region")]
    pub region: Option<Region>,
    /// Overrides the memory based estimate, `0` means estimate.
    pub slices_per_device: usize,
    pub dry_run: bool,
}

impl Default for ReconstructionConfig {
    fn default() -> Self {
        Self {
            input: PathBuf::new(),
            darks: None,
            flats: None,
            output: "slice".to_string(),
            overall_angle: None,
            angle: None,
            step: 1,
            number: None,
            width: None,
            height: None,
            y: 0,
            axis: None,
            lamino_angle: None,
            roll_angle: 0.0,
            z: 0.0,
            z_parameter: "z".to_string(),
            x_region: None,
            y_region: None,
            region: None,
            slices_per_device: 0,
            dry_run: false,
        }
    }
}

impl From<&ReconSpec> for ReconstructionConfig {
    fn from(spec: &ReconSpec) -> Self {
        Self {
            input: spec.input.clone(),
            darks: spec.darks.clone(),
            flats: spec.flats.clone(),
            output: spec.output.clone(),
            overall_angle: Some(spec.overall_angle),
            angle: Some(spec.angle),
            step: spec.projection_step,
            number: Some(spec.number),
            width: Some(spec.width),
            height: Some(spec.height),
            y: spec.y,
            axis: Some(spec.axis),
            lamino_angle: Some(spec.lamino_angle),
            roll_angle: spec.roll_angle,
            z: spec.z,
            z_parameter: spec.z_parameter.to_string(),
            x_region: spec.x_region,
            y_region: spec.y_region,
            region: spec.region,
            slices_per_device: spec.slices_per_device.map_or(0, |n| n.get()),
            dry_run: spec.dry_run,
        }
    }
}

/// Reads a region triple, mapping a `stop` of `-1` and `null` to `None`.
fn deserialize_region<'de, D>(deserializer: D) -> std::result::Result<Option<Region>, D::Error>
where
    D: Deserializer<'de>,
{
    let triple = Option::<[f64; 3]>::deserialize(deserializer)?;

    Ok(triple
        .filter(|&[_, stop, _]| stop != -1.0)
        .map(Region::from))
}
