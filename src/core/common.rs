//! Shared bounds, extent and resolution across collections of grids.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::core::crs::{reproject_bounds, CoordinateReference, DEFAULT_DENSIFY_POINTS};
use crate::core::geometry::{bounds_of, crs_of, crs_of_opt, extent_of, resolution_of};
use crate::types::{BoundingBox, Extent, RasterGrid, Resolution, WarpError, WarpResult};

/// Aggregation applied per axis in [`common_resolution`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ResolutionMode {
    Min,
    Max,
    #[default]
    Mean,
}

impl FromStr for ResolutionMode {
    type Err = WarpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "min" => Ok(ResolutionMode::Min),
            "max" => Ok(ResolutionMode::Max),
            "mean" => Ok(ResolutionMode::Mean),
            other => Err(WarpError::InvalidMode(format!("Unsupported mode: '{}'", other))),
        }
    }
}

impl fmt::Display for ResolutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionMode::Min => write!(f, "min"),
            ResolutionMode::Max => write!(f, "max"),
            ResolutionMode::Mean => write!(f, "mean"),
        }
    }
}

fn ensure_not_empty(grids: &[RasterGrid], operation: &str) -> WarpResult<()> {
    if grids.is_empty() {
        return Err(WarpError::EmptyCollection(format!(
            "{} needs at least one grid",
            operation
        )));
    }
    Ok(())
}

/// The projection shared by every grid, or a mismatch error stating `requirement`
fn shared_projection(
    grids: &[RasterGrid],
    requirement: &str,
) -> WarpResult<Option<CoordinateReference>> {
    let first = crs_of_opt(&grids[0])?;
    for grid in &grids[1..] {
        if crs_of_opt(grid)? != first {
            return Err(WarpError::ProjectionMismatch(requirement.to_string()));
        }
    }
    Ok(first)
}

/// Coordinate-wise union of every grid's bounds.
///
/// Without `reference_crs` all grids must share one projection; with it, each
/// grid's bounds are reprojected into `reference_crs` before the union.
pub fn common_bounds(
    grids: &[RasterGrid],
    reference_crs: Option<&CoordinateReference>,
) -> WarpResult<BoundingBox> {
    ensure_not_empty(grids, "common_bounds")?;

    let mut all_bounds = Vec::with_capacity(grids.len());
    match reference_crs {
        None => {
            shared_projection(
                grids,
                "All grids must have the same projection unless a reference CRS is given.",
            )?;
            for grid in grids {
                all_bounds.push(bounds_of(grid)?);
            }
        }
        Some(reference) => {
            for grid in grids {
                let crs = crs_of(grid)?;
                let bounds = reproject_bounds(&bounds_of(grid)?, &crs, reference, DEFAULT_DENSIFY_POINTS)?;
                all_bounds.push(bounds);
            }
        }
    }

    let union = all_bounds[1..]
        .iter()
        .fold(all_bounds[0], |acc, b| acc.union(b));
    log::debug!("Common bounds of {} grids: {:?}", grids.len(), union.as_tuple());
    Ok(union)
}

/// Union of every grid's geographic extent.
///
/// Extents are unioned directly in longitude/latitude, which is not the same
/// as reprojecting [`common_bounds`] once the projections are non-linear.
pub fn common_extent(grids: &[RasterGrid]) -> WarpResult<Extent> {
    ensure_not_empty(grids, "common_extent")?;

    let mut extent = extent_of(&grids[0])?;
    for grid in &grids[1..] {
        extent = extent.union(&extent_of(grid)?);
    }
    Ok(extent)
}

/// Per-axis min, max or mean of the grids' resolutions
pub fn common_resolution(grids: &[RasterGrid], mode: ResolutionMode) -> WarpResult<Resolution> {
    ensure_not_empty(grids, "common_resolution")?;
    shared_projection(grids, "All grids must have the same projection.")?;

    let resolutions = grids
        .iter()
        .map(resolution_of)
        .collect::<WarpResult<Vec<Resolution>>>()?;

    let aggregate = |values: Vec<f64>| -> f64 {
        match mode {
            ResolutionMode::Min => values.iter().cloned().fold(f64::INFINITY, f64::min),
            ResolutionMode::Max => values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
            ResolutionMode::Mean => values.iter().sum::<f64>() / values.len() as f64,
        }
    };

    let x = aggregate(resolutions.iter().map(|r| r.x).collect());
    let y = aggregate(resolutions.iter().map(|r| r.y).collect());
    Ok(Resolution::new(x, y))
}
