//! Core georeferencing, reprojection and alignment modules

pub mod crs;
pub mod geometry;
pub mod common;
pub mod resample;
pub mod reproject;
pub mod align;

// Re-export main types
pub use crs::{
    crs_equals, parse_crs, reproject_bounds, CoordinateReference, CrsDefinition, CrsFormat,
    CrsRepresentation, PointTransformer,
};
pub use geometry::{
    bounds_of, coordinate_axis, crs_of, crs_of_as, crs_of_opt, dims_of, extent_of, ncols, nrows,
    resolution_of, transform_of,
};
pub use common::{common_bounds, common_extent, common_resolution, ResolutionMode};
pub use resample::{Resample, ResamplingMethod};
pub use reproject::{
    reproject, reproject_to_grid, Reprojection, ReprojectionParams, TargetGrid, TargetGridSpec,
};
pub use align::{
    align, AlignInput, AlignedGrid, Alignment, AlignmentConfig, AlignmentReport, ResolutionPolicy,
};
