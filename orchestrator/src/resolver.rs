//! Completes a `ReconstructionConfig` into the `ReconSpec` every worker receives.

use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use comms::specs::{
    recon::{ReconSpec, SweepParameter},
    region::Region,
    run::RunContext,
};
use log::{debug, info, warn};

use crate::{
    configs::ReconstructionConfig,
    error::{ReconError, Result},
};

const DEFAULT_OVERALL_ANGLE: f64 = 360.0;

/// Inspects the projections on disk.
pub trait InputProbe {
    /// Amount of projection files found at `input`.
    fn count(&self, input: &Path) -> usize;

    /// `(width, height)` of the first projection, `None` if it can't be determined.
    fn shape(&self, input: &Path) -> Option<(usize, usize)>;
}

/// Probes projections on the local filesystem.
///
/// `input` is either a directory holding one image per projection or a single image.
/// Only image headers are read.
#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl FsProbe {
    fn files(input: &Path) -> Vec<PathBuf> {
        if input.is_file() {
            return vec![input.to_path_buf()];
        }

        let Ok(entries) = fs::read_dir(input) else {
            return Vec::new();
        };

        let mut files: Vec<_> = entries
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| path.is_file())
            .collect();
        files.sort();
        files
    }
}

impl InputProbe for FsProbe {
    fn count(&self, input: &Path) -> usize {
        Self::files(input).len()
    }

    fn shape(&self, input: &Path) -> Option<(usize, usize)> {
        let first = Self::files(input).into_iter().next()?;

        match image::image_dimensions(&first) {
            Ok((width, height)) => Some((width as usize, height as usize)),
            Err(e) => {
                warn!("can't read the shape of {}: {e}", first.display());
                None
            }
        }
    }
}

fn config_err<T>(msg: impl Into<String>) -> Result<T> {
    Err(ReconError::Configuration(msg.into()))
}

/// Checks an explicitly given region can be swept.
fn check_region(name: &str, region: Option<Region>) -> Result<Option<Region>> {
    match region {
        Some(r) if r.step == 0.0 || !(r.start.is_finite() && r.stop.is_finite() && r.step.is_finite()) => {
            config_err(format!("invalid {name} {r}, the step must be finite and non-zero"))
        }
        Some(r) if r.is_empty() => config_err(format!("{name} {r} is empty")),
        other => Ok(other),
    }
}

/// Fills in every parameter left unset in `config`.
///
/// Resolution is idempotent, resolving the config of a resolved spec yields the same spec.
///
/// # Arguments
/// * `config` - The user given parameters.
/// * `probe` - Used to count and measure the projections when needed.
/// * `run` - The run being resolved.
///
/// # Errors
/// `Configuration` if a parameter is invalid or can't be determined from the input.
pub fn resolve<P: InputProbe + ?Sized>(
    config: &ReconstructionConfig,
    probe: &P,
    run: &RunContext,
) -> Result<ReconSpec> {
    if config.input.as_os_str().is_empty() {
        return config_err("no input given");
    }

    if config.step == 0 {
        return config_err("the projection step must be positive");
    }

    let z_parameter: SweepParameter = config
        .z_parameter
        .parse()
        .map_err(ReconError::Configuration)?;
    info!(run = run.id(); "z parameter: {z_parameter}");

    let Some(lamino_angle) = config.lamino_angle else {
        return config_err("the laminographic angle is required");
    };

    let overall_angle = match config.overall_angle {
        Some(angle) if angle != 0.0 => angle,
        _ => {
            info!(run = run.id(); "overall angle not specified, using {DEFAULT_OVERALL_ANGLE} deg");
            DEFAULT_OVERALL_ANGLE
        }
    };

    let angle = match config.angle {
        Some(angle) if angle != 0.0 => angle,
        _ => {
            let num_files = probe.count(&config.input);
            if num_files == 0 {
                return config_err(format!(
                    "no input files found in {}",
                    config.input.display()
                ));
            }

            let angle = overall_angle / num_files as f64 * config.step as f64;
            info!(
                run = run.id();
                "angle not specified, calculating from {num_files} projections and step {}: {angle} deg",
                config.step
            );
            angle
        }
    };

    let probed = match (config.width, config.height) {
        (Some(_), Some(_)) => None,
        _ => match probe.shape(&config.input) {
            Some(shape) => Some(shape),
            None => return config_err("could not determine width from the input"),
        },
    };

    let number = match config.number {
        Some(number) if number != 0 => number,
        _ => (overall_angle / angle).abs().round() as usize,
    };

    let width = match (config.width, probed) {
        (Some(width), _) => width,
        (None, Some((width, _))) => width,
        (None, None) => return config_err("could not determine width from the input"),
    };

    let height = match (config.height, probed) {
        (Some(height), _) => height,
        (None, Some((_, probed_height))) => match probed_height.checked_sub(config.y) {
            Some(height) if height > 0 => height,
            _ => {
                return config_err(format!(
                    "y offset {} lies outside the {probed_height} px high projections",
                    config.y
                ));
            }
        },
        (None, None) => return config_err("could not determine height from the input"),
    };

    if width == 0 || height == 0 {
        return config_err(format!("invalid projection size {width}x{height}"));
    }

    let axis = config.axis.unwrap_or(width as f64 / 2.0);

    let spec = ReconSpec {
        input: config.input.clone(),
        darks: config.darks.clone(),
        flats: config.flats.clone(),
        output: config.output.clone(),
        overall_angle,
        angle,
        projection_step: config.step,
        number,
        width,
        height,
        y: config.y,
        axis,
        lamino_angle,
        roll_angle: config.roll_angle,
        z: config.z,
        z_parameter,
        x_region: check_region("x region", config.x_region)?,
        y_region: check_region("y region", config.y_region)?,
        region: check_region("parameter region", config.region)?,
        slices_per_device: NonZeroUsize::new(config.slices_per_device),
        dry_run: config.dry_run,
    };

    if spec.dry_run {
        info!(
            run = run.id();
            "dummy data W x H x N: {} x {} x {}",
            spec.width, spec.height, spec.number
        );
    }

    if spec.darks.is_some() != spec.flats.is_some() {
        warn!(run = run.id(); "flat field correction needs both darks and flats, skipping it");
    }

    debug!(run = run.id(); "resolved {spec:?}");
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;

    /// A probe over an imaginary projection stack that counts its calls.
    struct FakeProbe {
        files: usize,
        shape: Option<(usize, usize)>,
        calls: Cell<usize>,
    }

    impl FakeProbe {
        fn new(files: usize, shape: Option<(usize, usize)>) -> Self {
            Self {
                files,
                shape,
                calls: Cell::new(0),
            }
        }
    }

    impl InputProbe for FakeProbe {
        fn count(&self, _: &Path) -> usize {
            self.calls.set(self.calls.get() + 1);
            self.files
        }

        fn shape(&self, _: &Path) -> Option<(usize, usize)> {
            self.calls.set(self.calls.get() + 1);
            self.shape
        }
    }

    fn config() -> ReconstructionConfig {
        ReconstructionConfig {
            input: "/data/projections".into(),
            lamino_angle: Some(30.0),
            ..Default::default()
        }
    }

    fn run() -> RunContext {
        RunContext::with_id("test")
    }

    #[test]
    fn fills_everything_from_the_input() {
        let probe = FakeProbe::new(720, Some((1024, 512)));
        let spec = resolve(&config(), &probe, &run()).unwrap();

        assert_eq!(spec.overall_angle, 360.0);
        assert_eq!(spec.angle, 0.5);
        assert_eq!(spec.number, 720);
        assert_eq!(spec.width, 1024);
        assert_eq!(spec.height, 512);
        assert_eq!(spec.axis, 512.0);
        assert_eq!(spec.z_parameter, SweepParameter::Z);
        assert_eq!(spec.slices_per_device, None);
    }

    #[test]
    fn step_scales_the_angle() {
        let mut config = config();
        config.step = 2;
        config.overall_angle = Some(180.0);

        let spec = resolve(&config, &FakeProbe::new(360, Some((64, 64))), &run()).unwrap();

        assert_eq!(spec.angle, 1.0);
        assert_eq!(spec.number, 180);
    }

    #[test]
    fn height_skips_the_vertical_offset() {
        let mut config = config();
        config.y = 100;

        let spec = resolve(&config, &FakeProbe::new(10, Some((256, 300))), &run()).unwrap();
        assert_eq!(spec.height, 200);
    }

    #[test]
    fn offset_past_the_projection_is_rejected() {
        let mut config = config();
        config.y = 300;

        let err = resolve(&config, &FakeProbe::new(10, Some((256, 300))), &run()).unwrap_err();
        assert!(matches!(err, ReconError::Configuration(_)));
    }

    #[test]
    fn no_input_files_is_a_configuration_error() {
        let err = resolve(&config(), &FakeProbe::new(0, Some((64, 64))), &run()).unwrap_err();

        let ReconError::Configuration(msg) = err else {
            panic!("expected a configuration error, got {err}");
        };
        assert!(msg.contains("no input files found in /data/projections"), "{msg}");
    }

    #[test]
    fn unknown_shape_is_a_configuration_error() {
        let err = resolve(&config(), &FakeProbe::new(10, None), &run()).unwrap_err();
        assert!(matches!(err, ReconError::Configuration(_)));
    }

    #[test]
    fn explicit_values_skip_probing() {
        let mut config = config();
        config.angle = Some(0.25);
        config.width = Some(100);
        config.height = Some(50);

        let probe = FakeProbe::new(0, None);
        let spec = resolve(&config, &probe, &run()).unwrap();

        assert_eq!(probe.calls.get(), 0);
        assert_eq!(spec.number, 1440);
        assert_eq!((spec.width, spec.height), (100, 50));
    }

    #[test]
    fn resolution_is_idempotent() {
        let mut config = config();
        config.z_parameter = "lamino-angle".to_string();
        config.region = Some(Region::new(20.0, 40.0, 0.5));
        config.slices_per_device = 8;

        let spec = resolve(&config, &FakeProbe::new(1000, Some((2000, 1500))), &run()).unwrap();

        let probe = FakeProbe::new(0, None);
        let again = resolve(&ReconstructionConfig::from(&spec), &probe, &run()).unwrap();

        assert_eq!(again, spec);
        assert_eq!(probe.calls.get(), 0);
    }

    #[test]
    fn invalid_parameters_are_rejected() {
        let probe = FakeProbe::new(10, Some((64, 64)));

        let mut unknown = config();
        unknown.z_parameter = "phi".to_string();

        let mut zero_step = config();
        zero_step.region = Some(Region::new(0.0, 10.0, 0.0));

        let mut empty = config();
        empty.x_region = Some(Region::new(10.0, 0.0, 1.0));

        let mut no_lamino = config();
        no_lamino.lamino_angle = None;

        let no_input = ReconstructionConfig {
            lamino_angle: Some(30.0),
            ..Default::default()
        };

        for config in [unknown, zero_step, empty, no_lamino, no_input] {
            let err = resolve(&config, &probe, &run()).unwrap_err();
            assert!(matches!(err, ReconError::Configuration(_)), "{config:?}");
        }
    }

    #[test]
    fn probes_real_tiffs() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..4 {
            image::GrayImage::new(48, 32)
                .save(dir.path().join(format!("proj-{i:04}.tif")))
                .unwrap();
        }

        assert_eq!(FsProbe.count(dir.path()), 4);
        assert_eq!(FsProbe.shape(dir.path()), Some((48, 32)));

        let single = dir.path().join("proj-0000.tif");
        assert_eq!(FsProbe.count(&single), 1);
        assert_eq!(FsProbe.shape(&single), Some((48, 32)));
    }

    #[test]
    fn missing_input_has_no_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nothing-here");

        assert_eq!(FsProbe.count(&missing), 0);
        assert_eq!(FsProbe.count(dir.path()), 0);
        assert_eq!(FsProbe.shape(dir.path()), None);
    }
}
