use comms::specs::{plan::Pass, region::Region};

/// Splits `region` into consecutive chunks of `slices` samples each.
///
/// The last chunk is truncated to the region's stop. Chunk `k`'s stop is exactly chunk
/// `k + 1`'s start, so the chunks tile the region without gaps or overlaps.
///
/// # Arguments
/// * `region` - The sweep region to split.
/// * `slices` - Amount of samples per chunk, must be greater than 0.
pub fn split(region: &Region, slices: usize) -> Vec<Region> {
    if slices == 0 {
        return Vec::new();
    }

    let width = region.step * slices as f64;
    let count = Region::new(region.start, region.stop, width).len();
    let start_of = |k: usize| region.start + k as f64 * width;

    (0..count)
        .map(|k| {
            let stop = if k + 1 == count {
                region.stop
            } else {
                start_of(k + 1)
            };

            Region::new(start_of(k), stop, region.step)
        })
        .collect()
}

/// Groups chunks into passes of `num_gpus` chunks, keeping their order.
///
/// Only the last pass may hold fewer chunks.
pub fn group(chunks: Vec<Region>, num_gpus: usize) -> Vec<Pass> {
    if num_gpus == 0 {
        return Vec::new();
    }

    chunks
        .chunks(num_gpus)
        .enumerate()
        .map(|(index, chunks)| Pass {
            index,
            chunks: chunks.to_vec(),
        })
        .collect()
}
