//! Resampling kernels and the same-projection `Resample` operation.

use ndarray::ArrayView2;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::reproject::{Reprojection, ReprojectionParams};
use crate::types::{RasterGrid, Resolution, WarpError, WarpResult};

/// Kernel used to compute a target pixel from the source neighbourhood
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResamplingMethod {
    #[default]
    Nearest,
    Bilinear,
    Cubic,
}

impl FromStr for ResamplingMethod {
    type Err = WarpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "nearest" => Ok(ResamplingMethod::Nearest),
            "bilinear" => Ok(ResamplingMethod::Bilinear),
            "cubic" => Ok(ResamplingMethod::Cubic),
            _ => Err(WarpError::InvalidMode(format!(
                "Unsupported resampling method: '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResamplingMethod::Nearest => write!(f, "nearest"),
            ResamplingMethod::Bilinear => write!(f, "bilinear"),
            ResamplingMethod::Cubic => write!(f, "cubic"),
        }
    }
}

impl ResamplingMethod {
    /// Sample `image` at fractional pixel `(col, row)`.
    ///
    /// Positions outside the footprint of the source pixels (more than half a
    /// pixel beyond the outer centres) yield NaN.
    pub fn sample(&self, image: &ArrayView2<f64>, col: f64, row: f64) -> f64 {
        let (height, width) = image.dim();
        if !inside_footprint(col, width) || !inside_footprint(row, height) {
            return f64::NAN;
        }

        match self {
            ResamplingMethod::Nearest => {
                let c = ((col + 0.5).floor() as usize).min(width - 1);
                let r = ((row + 0.5).floor() as usize).min(height - 1);
                image[[r, c]]
            }
            ResamplingMethod::Bilinear => bilinear(image, col, row),
            ResamplingMethod::Cubic => cubic(image, col, row),
        }
    }
}

#[inline]
fn inside_footprint(position: f64, count: usize) -> bool {
    count > 0 && position >= -0.5 && position < count as f64 - 0.5
}

fn bilinear(image: &ArrayView2<f64>, col: f64, row: f64) -> f64 {
    let (height, width) = image.dim();
    let x = col.clamp(0.0, (width - 1) as f64);
    let y = row.clamp(0.0, (height - 1) as f64);

    let x1 = x.floor() as usize;
    let y1 = y.floor() as usize;
    let x2 = (x1 + 1).min(width - 1);
    let y2 = (y1 + 1).min(height - 1);

    let dx = x - x1 as f64;
    let dy = y - y1 as f64;

    let v11 = image[[y1, x1]];
    let v12 = image[[y2, x1]];
    let v21 = image[[y1, x2]];
    let v22 = image[[y2, x2]];

    v11 * (1.0 - dx) * (1.0 - dy) + v21 * dx * (1.0 - dy) + v12 * (1.0 - dx) * dy + v22 * dx * dy
}

/// Keys cubic convolution kernel with a = -0.5
#[inline]
fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        1.5 * t.powi(3) - 2.5 * t.powi(2) + 1.0
    } else if t < 2.0 {
        -0.5 * t.powi(3) + 2.5 * t.powi(2) - 4.0 * t + 2.0
    } else {
        0.0
    }
}

fn cubic(image: &ArrayView2<f64>, col: f64, row: f64) -> f64 {
    let (height, width) = image.dim();
    let x = col.clamp(0.0, (width - 1) as f64);
    let y = row.clamp(0.0, (height - 1) as f64);
    let x0 = x.floor() as isize;
    let y0 = y.floor() as isize;

    let clamp_index = |i: isize, n: usize| i.clamp(0, n as isize - 1) as usize;

    let mut value = 0.0;
    for m in -1..=2isize {
        let wy = cubic_weight(y - (y0 + m) as f64);
        if wy == 0.0 {
            continue;
        }
        let r = clamp_index(y0 + m, height);
        for n in -1..=2isize {
            let wx = cubic_weight(x - (x0 + n) as f64);
            if wx == 0.0 {
                continue;
            }
            value += wy * wx * image[[r, clamp_index(x0 + n, width)]];
        }
    }
    value
}

/// Change the resolution or pixel counts of a grid without leaving its projection
#[derive(Debug, Clone, Default)]
pub struct Resample {
    params: ReprojectionParams,
}

impl Resample {
    /// Resample to a target resolution (scalar or `(x, y)` pair)
    pub fn to_resolution(res: impl Into<Resolution>) -> Self {
        Self {
            params: ReprojectionParams::new().with_res(res),
        }
    }

    /// Resample to `width` columns; rows follow the source pixel-count ratio
    pub fn to_width(width: usize) -> Self {
        Self {
            params: ReprojectionParams::new().with_width(width),
        }
    }

    /// Resample to `height` rows; columns follow the source pixel-count ratio
    pub fn to_height(height: usize) -> Self {
        Self {
            params: ReprojectionParams::new().with_height(height),
        }
    }

    pub fn to_shape(width: usize, height: usize) -> Self {
        Self {
            params: ReprojectionParams::new().with_shape(width, height),
        }
    }

    pub fn with_resampling(mut self, method: ResamplingMethod) -> Self {
        self.params = self.params.with_resampling(method);
        self
    }

    pub fn apply(&self, grid: &RasterGrid) -> WarpResult<RasterGrid> {
        Reprojection::new(self.params.clone())?.apply(grid)
    }
}
