//! Lays a reconstruction out over the discovered GPUs.

pub mod memory;
pub mod regions;

use comms::specs::{plan::Plan, recon::ReconSpec, region::Region, run::RunContext};
use log::info;

use crate::{Result, WorkerErr, probe::GpuDescriptor};

/// Resolves the reconstruction regions and splits the parameter sweep into passes.
///
/// The default y-region spans the projection *width*, like the x-region, since the
/// reconstructed slice is square in the detector's horizontal extent.
///
/// # Arguments
/// * `spec` - The resolved reconstruction parameters.
/// * `gpus` - The discovered devices, every pass runs at most one chunk on each.
/// * `run` - The run this plan belongs to.
///
/// # Errors
/// `Planning` if there are no GPUs or not even a single slice fits on the weakest one,
/// `Configuration` if the parameter region is empty.
pub fn plan(spec: &ReconSpec, gpus: &[GpuDescriptor], run: &RunContext) -> Result<Plan> {
    if gpus.is_empty() {
        return Err(WorkerErr::Planning("no GPUs were discovered".into()));
    }

    let x_region = spec.x_region.unwrap_or_else(|| Region::centered(spec.width));
    let y_region = spec.y_region.unwrap_or_else(|| Region::centered(spec.width));
    let region = spec.region.unwrap_or_else(|| Region::centered(spec.height));

    info!(run = run.id(); "x region: {x_region}");
    info!(run = run.id(); "y region: {y_region}");
    info!(run = run.id(), parameter = spec.z_parameter.as_str(); "parameter region: {region}");

    let num_slices = region.len();
    if num_slices == 0 {
        return Err(WorkerErr::Configuration(format!(
            "parameter region {region} holds no slices"
        )));
    }

    let (slice_width, slice_height) = (x_region.len(), y_region.len());
    let slices_per_device = match spec.slices_per_device {
        Some(slices) => slices.get(),
        None => memory::slices_per_device(gpus, slice_width, slice_height),
    };

    if slices_per_device == 0 {
        return Err(WorkerErr::Planning(format!(
            "a single {slice_width}x{slice_height} slice does not fit on the weakest GPU"
        )));
    }

    if let Some(usable) = memory::usable_memory(gpus) {
        info!(run = run.id(); "GPU memory used per GPU: {:.2} GB", usable / f64::from(1u32 << 30));
    }

    let slices_per_device = slices_per_device.min(num_slices);
    info!(run = run.id(); "using {slices_per_device} slices per GPU");

    let chunks = regions::split(&region, slices_per_device);
    let passes = regions::group(chunks, gpus.len());

    let plan = Plan {
        x_region,
        y_region,
        slices_per_device,
        num_gpus: gpus.len(),
        passes,
    };

    info!(
        run = run.id();
        "using {} GPU(s) in {} pass(es)",
        plan.gpus_used(),
        plan.passes.len()
    );

    Ok(plan)
}
