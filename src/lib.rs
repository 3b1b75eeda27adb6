//! gridwarp: coordinate-reference negotiation, reprojection and alignment of
//! gridded raster data.
//!
//! Grids captured in different projections, resolutions and extents are
//! brought onto one shared grid so they can be compared pixel by pixel.
//! Georeferencing is derived from pixel-centre coordinate arrays (or a legacy
//! embedded side-channel), target grids are validated from any legal
//! combination of CRS, transform, extent, resolution and size, and batches are
//! aligned in parallel with per-item error reporting.

pub mod types;
pub mod io;
pub mod core;
pub mod testing;

// Re-export main types and functions for easier access
pub use types::{
    AffineTransform, BoundingBox, EmbeddedGeoreference, Extent, RasterGrid, Resolution, Variable,
    WarpError, WarpResult,
};

pub use crate::core::{
    align, bounds_of, common_bounds, common_extent, common_resolution, crs_of, dims_of, extent_of,
    parse_crs, reproject, resolution_of, transform_of, AlignInput, Alignment, AlignmentConfig,
    CoordinateReference, CrsDefinition, Resample, ResamplingMethod, Reprojection,
    ReprojectionParams, ResolutionMode, ResolutionPolicy,
};

pub use io::{GdalGridIo, GridIo, RasterFormat};
