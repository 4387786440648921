use std::fmt;

use serde::{Deserialize, Serialize};

/// A 1-D sweep range `[start, stop)` sampled every `step`.
///
/// Coordinates are pixels for the x/y regions and either pixels or degrees for the
/// parameter region, depending on the swept parameter. Serialized as the triple
/// `[start, stop, step]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f64; 3]", into = "[f64; 3]")]
pub struct Region {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

impl Region {
    pub fn new(start: f64, stop: f64, step: f64) -> Self {
        Self { start, stop, step }
    }

    /// The region covering `n` unit samples centered at zero.
    ///
    /// `centered(10)` is `(-5, 5, 1)` and `centered(11)` is `(-5, 6, 1)`.
    pub fn centered(n: usize) -> Self {
        let half = n / 2;
        Self::new(-(half as f64), (half + n % 2) as f64, 1.0)
    }

    /// The amount of samples in the region, following `arange` semantics.
    pub fn len(&self) -> usize {
        if self.step == 0.0 || !self.step.is_finite() {
            return 0;
        }

        let n = ((self.stop - self.start) / self.step).ceil();
        if n > 0.0 { n as usize } else { 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Converts every coordinate from degrees to radians.
    pub fn to_radians(self) -> Self {
        Self::new(
            self.start.to_radians(),
            self.stop.to_radians(),
            self.step.to_radians(),
        )
    }
}

impl From<[f64; 3]> for Region {
    fn from([start, stop, step]: [f64; 3]) -> Self {
        Self::new(start, stop, step)
    }
}

impl From<Region> for [f64; 3] {
    fn from(region: Region) -> Self {
        [region.start, region.stop, region.step]
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.start, self.stop, self.step)
    }
}
