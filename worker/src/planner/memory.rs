//! Per-device slice budget.
//!
//! The weakest device governs the whole plan, every GPU gets the same amount of slices per pass.

use crate::probe::GpuDescriptor;

/// Headroom for double buffering and the intermediate buffers of the pipeline. Applied twice.
pub const SAFETY_COEFF: f64 = 3.0;

/// Largest buffer the vendor runtimes accept, 4 GiB.
pub const MAX_ALLOCATION: f64 = 4_294_967_296.0;

const BYTES_PER_PIXEL: f64 = size_of::<f32>() as f64;

/// Bytes of the weakest device that may be used for reconstructed slices.
///
/// # Arguments
/// * `gpus` - The discovered devices.
///
/// # Returns
/// `None` when `gpus` is empty, otherwise a value never bigger than `MAX_ALLOCATION / SAFETY_COEFF`.
pub fn usable_memory(gpus: &[GpuDescriptor]) -> Option<f64> {
    let weakest = gpus.iter().min_by_key(|gpu| gpu.global_mem_size)?;

    let total = weakest.global_mem_size as f64;
    let max_alloc = weakest.max_mem_alloc_size as f64;

    let ceiling = if max_alloc * SAFETY_COEFF <= total {
        max_alloc
    } else {
        total / SAFETY_COEFF
    };

    Some(ceiling.min(MAX_ALLOCATION) / SAFETY_COEFF)
}

/// Amount of `width` x `height` slices every device can hold at once.
///
/// A result of 0 means not even a single slice fits, callers must not plan with it.
pub fn slices_per_device(gpus: &[GpuDescriptor], width: usize, height: usize) -> usize {
    let Some(usable) = usable_memory(gpus) else {
        return 0;
    };

    let slice_bytes = width as f64 * height as f64 * BYTES_PER_PIXEL;
    if slice_bytes <= 0.0 {
        return 0;
    }

    (usable / slice_bytes).floor() as usize
}
