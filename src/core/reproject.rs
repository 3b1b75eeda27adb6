//! Reprojection of a grid onto a fully resolved target grid.
//!
//! A target grid can be described by many parameter combinations. They are
//! validated once into a [`TargetGridSpec`] before any resampling happens, and
//! every legal combination resolves to the same `(transform, width, height)`
//! triple for the same geometry.

use ndarray::{Array3, Axis};
use serde::{Deserialize, Serialize};

use crate::core::crs::{
    reproject_bounds, CoordinateReference, CrsDefinition, PointTransformer, DEFAULT_DENSIFY_POINTS,
};
use crate::core::geometry::{bounds_of, coordinate_axis, crs_of, transform_of};
use crate::core::resample::ResamplingMethod;
use crate::types::{
    AffineTransform, BoundingBox, RasterGrid, Resolution, Variable, WarpError, WarpResult, X_DIM,
    Y_DIM,
};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// Every way a caller may describe the target of a reprojection.
///
/// All fields are optional; [`TargetGridSpec::from_params`] decides whether the
/// combination is legal.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReprojectionParams {
    /// Target CRS, the source CRS when absent
    pub crs: Option<CrsDefinition>,
    pub transform: Option<AffineTransform>,
    /// Target bounds in target CRS units
    pub extent: Option<BoundingBox>,
    pub width: Option<usize>,
    pub height: Option<usize>,
    pub res: Option<Resolution>,
    pub resampling: ResamplingMethod,
}

impl ReprojectionParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn to_crs(mut self, crs: impl Into<CrsDefinition>) -> Self {
        self.crs = Some(crs.into());
        self
    }

    pub fn with_transform(mut self, transform: AffineTransform) -> Self {
        self.transform = Some(transform);
        self
    }

    pub fn with_extent(mut self, extent: BoundingBox) -> Self {
        self.extent = Some(extent);
        self
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = Some(width);
        self
    }

    pub fn with_height(mut self, height: usize) -> Self {
        self.height = Some(height);
        self
    }

    pub fn with_shape(self, width: usize, height: usize) -> Self {
        self.with_width(width).with_height(height)
    }

    pub fn with_res(mut self, res: impl Into<Resolution>) -> Self {
        self.res = Some(res.into());
        self
    }

    pub fn with_resampling(mut self, method: ResamplingMethod) -> Self {
        self.resampling = method;
        self
    }
}

/// The legal combinations of target-grid parameters
#[derive(Debug, Clone, PartialEq)]
pub enum TargetGridSpec {
    TransformAndShape {
        transform: AffineTransform,
        width: usize,
        height: usize,
    },
    TransformAndExtent {
        transform: AffineTransform,
        extent: BoundingBox,
    },
    ExtentAndShape {
        extent: BoundingBox,
        width: usize,
        height: usize,
    },
    ExtentAndResolution {
        extent: BoundingBox,
        res: Resolution,
    },
    Resolution(Resolution),
    Width(usize),
    Height(usize),
    Shape {
        width: usize,
        height: usize,
    },
    /// Source bounds reprojected into the target CRS, source pixel counts
    SourceDefault,
}

impl TargetGridSpec {
    /// Validate a parameter set, rejecting combinations that do not pin down
    /// exactly one target grid
    pub fn from_params(params: &ReprojectionParams) -> WarpResult<Self> {
        let underspecified = |msg: &str| -> WarpResult<Self> {
            Err(WarpError::UnderspecifiedTargetGrid(msg.to_string()))
        };

        let spec = match (params.transform, params.extent, params.width, params.height, params.res) {
            (Some(transform), None, Some(width), Some(height), None) => Self::TransformAndShape {
                transform,
                width,
                height,
            },
            (Some(transform), Some(extent), None, None, None) => Self::TransformAndExtent { transform, extent },
            (Some(_), _, _, _, Some(_)) => {
                return underspecified(
                    "`transform` already fixes the resolution, `res` cannot be given as well.",
                )
            }
            (Some(_), Some(_), _, _, None) => {
                return underspecified(
                    "If `transform` is given, specify either `width` and `height` or `extent`, not both.",
                )
            }
            (Some(_), None, _, _, None) => {
                return underspecified(
                    "If `transform` is given, you must also specify the `width` and `height` arguments.",
                )
            }
            (None, Some(extent), Some(width), Some(height), None) => Self::ExtentAndShape { extent, width, height },
            (None, Some(extent), None, None, Some(res)) => Self::ExtentAndResolution { extent, res },
            (None, Some(_), _, _, _) => {
                return underspecified(
                    "Need to provide either `width` and `height` or `res` when `extent` is given.",
                )
            }
            (None, None, None, None, Some(res)) => Self::Resolution(res),
            (None, None, _, _, Some(_)) => {
                return underspecified("`res` and `width`/`height` are mutually exclusive.")
            }
            (None, None, Some(width), Some(height), None) => Self::Shape { width, height },
            (None, None, Some(width), None, None) => Self::Width(width),
            (None, None, None, Some(height), None) => Self::Height(height),
            (None, None, None, None, None) => Self::SourceDefault,
        };

        spec.validate()?;
        Ok(spec)
    }

    fn validate(&self) -> WarpResult<()> {
        let check_count = |name: &str, count: usize| {
            if count < 2 {
                Err(WarpError::DegenerateGrid(format!(
                    "`{}` must be at least 2 pixels, got {}",
                    name, count
                )))
            } else {
                Ok(())
            }
        };
        let check_extent = |extent: &BoundingBox| {
            let (w, h) = (extent.width(), extent.height());
            if w > 0.0 && h > 0.0 && w.is_finite() && h.is_finite() {
                Ok(())
            } else {
                Err(WarpError::DegenerateGrid(format!(
                    "extent {:?} has no area",
                    extent.as_tuple()
                )))
            }
        };
        let check_res = |res: &Resolution| {
            if res.is_valid() {
                Ok(())
            } else {
                Err(WarpError::InvalidGrid(format!(
                    "resolution {:?} must be positive and finite",
                    res.as_tuple()
                )))
            }
        };

        match self {
            Self::TransformAndShape { width, height, .. }
            | Self::ExtentAndShape { width, height, .. }
            | Self::Shape { width, height } => {
                check_count("width", *width)?;
                check_count("height", *height)?;
            }
            Self::Width(width) => check_count("width", *width)?,
            Self::Height(height) => check_count("height", *height)?,
            Self::ExtentAndResolution { res, .. } | Self::Resolution(res) => check_res(res)?,
            Self::TransformAndExtent { .. } | Self::SourceDefault => {}
        }

        if let Self::TransformAndExtent { extent, .. }
        | Self::ExtentAndShape { extent, .. }
        | Self::ExtentAndResolution { extent, .. } = self
        {
            check_extent(extent)?;
        }
        Ok(())
    }

    /// Resolve the spec against a source grid into a complete target grid
    pub fn resolve(
        &self,
        source: &RasterGrid,
        source_crs: &CoordinateReference,
        target_crs: &CoordinateReference,
    ) -> WarpResult<TargetGrid> {
        let crs = target_crs.clone();
        let default_extent = || -> WarpResult<BoundingBox> {
            let extent = reproject_bounds(&bounds_of(source)?, source_crs, target_crs, DEFAULT_DENSIFY_POINTS)?;
            if extent.width() > 0.0 && extent.height() > 0.0 {
                Ok(extent)
            } else {
                Err(WarpError::DegenerateGrid(format!(
                    "source bounds collapse to {:?} in {}",
                    extent.as_tuple(),
                    target_crs
                )))
            }
        };
        let (src_cols, src_rows) = (source.ncols(), source.nrows());

        match *self {
            Self::TransformAndShape { transform, width, height } => Ok(TargetGrid { crs, transform, width, height }),
            Self::TransformAndExtent { transform, extent } => {
                let width = pixel_count(extent.width(), transform.a.abs(), X_DIM)?;
                let height = pixel_count(extent.height(), transform.e.abs(), Y_DIM)?;
                Ok(TargetGrid { crs, transform, width, height })
            }
            Self::ExtentAndShape { extent, width, height } => TargetGrid::from_extent_and_shape(crs, &extent, width, height),
            Self::ExtentAndResolution { extent, res } => TargetGrid::from_extent_and_resolution(crs, &extent, res),
            Self::Resolution(res) => TargetGrid::from_extent_and_resolution(crs, &default_extent()?, res),
            Self::Width(width) => {
                let height = matching_count(width, true, src_cols, src_rows);
                TargetGrid::from_extent_and_shape(crs, &default_extent()?, width, height)
            }
            Self::Height(height) => {
                let width = matching_count(height, false, src_cols, src_rows);
                TargetGrid::from_extent_and_shape(crs, &default_extent()?, width, height)
            }
            Self::Shape { width, height } => TargetGrid::from_extent_and_shape(crs, &default_extent()?, width, height),
            Self::SourceDefault => TargetGrid::from_extent_and_shape(crs, &default_extent()?, src_cols, src_rows),
        }
    }
}

/// `round(span / res) + 1` pixel centres
pub(crate) fn pixel_count(span: f64, res: f64, axis: &str) -> WarpResult<usize> {
    let count = (span / res).round() + 1.0;
    if !count.is_finite() || count < 2.0 {
        return Err(WarpError::DegenerateGrid(format!(
            "a span of {} at resolution {} leaves fewer than two pixels along '{}'",
            span, res, axis
        )));
    }
    Ok(count as usize)
}

/// Count along the other axis for a lone `width` (`given_is_width`) or
/// `height`.
///
/// Of the two counts bracketing the exact scaled value, the closer one whose
/// integer width/height ratio (and height/width ratio) equals the source's
/// wins.
pub(crate) fn matching_count(given: usize, given_is_width: bool, src_cols: usize, src_rows: usize) -> usize {
    let (src_given, src_other) = if given_is_width {
        (src_cols, src_rows)
    } else {
        (src_rows, src_cols)
    };
    let exact = given as f64 * src_other as f64 / src_given.max(1) as f64;

    let shape = |other: usize| {
        if given_is_width {
            (given, other)
        } else {
            (other, given)
        }
    };
    let ratios = |(w, h): (usize, usize)| (w / h.max(1), h / w.max(1));
    let source_ratios = ratios((src_cols, src_rows));

    let mut candidates: Vec<usize> = vec![exact.floor() as usize, exact.ceil() as usize];
    candidates.retain(|&c| c >= 2);
    candidates.sort_by(|a, b| {
        (*a as f64 - exact)
            .abs()
            .partial_cmp(&(*b as f64 - exact).abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    candidates
        .iter()
        .find(|&&c| ratios(shape(c)) == source_ratios)
        .or_else(|| candidates.iter().find(|&&c| ratios(shape(c)).0 == source_ratios.0))
        .copied()
        .unwrap_or_else(|| (exact.round() as usize).max(2))
}

/// Fully resolved target grid geometry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetGrid {
    pub crs: CoordinateReference,
    pub transform: AffineTransform,
    pub width: usize,
    pub height: usize,
}

impl TargetGrid {
    /// North-up grid whose outer pixel centres sit exactly on `extent`
    pub fn from_extent_and_shape(
        crs: CoordinateReference,
        extent: &BoundingBox,
        width: usize,
        height: usize,
    ) -> WarpResult<Self> {
        if width < 2 || height < 2 {
            return Err(WarpError::DegenerateGrid(format!(
                "target grid of {}x{} pixels has no resolution",
                width, height
            )));
        }
        let res_x = extent.width() / (width - 1) as f64;
        let res_y = extent.height() / (height - 1) as f64;
        Ok(Self {
            crs,
            transform: AffineTransform::from_origin(extent.left, extent.top, res_x, res_y),
            width,
            height,
        })
    }

    /// North-up grid at exactly `res`, anchored at the top-left of `extent`
    pub fn from_extent_and_resolution(
        crs: CoordinateReference,
        extent: &BoundingBox,
        res: Resolution,
    ) -> WarpResult<Self> {
        let width = pixel_count(extent.width(), res.x, X_DIM)?;
        let height = pixel_count(extent.height(), res.y, Y_DIM)?;
        Ok(Self {
            crs,
            transform: AffineTransform::from_origin(extent.left, extent.top, res.x, res.y),
            width,
            height,
        })
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.transform.a, self.transform.e)
    }

    pub fn bounds(&self) -> BoundingBox {
        let t = &self.transform;
        let last_col = (self.width - 1) as f64;
        let last_row = (self.height - 1) as f64;
        let corners = [
            t.apply(0.0, 0.0),
            t.apply(last_col, 0.0),
            t.apply(0.0, last_row),
            t.apply(last_col, last_row),
        ];
        BoundingBox::envelope(corners).unwrap_or_else(|| BoundingBox::new(t.c, t.f, t.c, t.f))
    }

    pub fn x_coords(&self) -> ndarray::Array1<f64> {
        coordinate_axis(self.transform.c, self.transform.a, self.width)
    }

    pub fn y_coords(&self) -> ndarray::Array1<f64> {
        coordinate_axis(self.transform.f, self.transform.e, self.height)
    }
}

/// A validated reprojection that can be applied to many grids
#[derive(Debug, Clone)]
pub struct Reprojection {
    crs: Option<CoordinateReference>,
    spec: TargetGridSpec,
    resampling: ResamplingMethod,
}

impl Reprojection {
    pub fn new(params: ReprojectionParams) -> WarpResult<Self> {
        let spec = TargetGridSpec::from_params(&params)?;
        let crs = params.crs.map(|crs| CoordinateReference::parse(crs)).transpose()?;
        Ok(Self {
            crs,
            spec,
            resampling: params.resampling,
        })
    }

    pub fn spec(&self) -> &TargetGridSpec {
        &self.spec
    }

    /// Target geometry this reprojection produces for `grid`
    pub fn target_grid(&self, grid: &RasterGrid) -> WarpResult<TargetGrid> {
        let source_crs = crs_of(grid)?;
        let target_crs = self.crs.clone().unwrap_or_else(|| source_crs.clone());
        self.spec.resolve(grid, &source_crs, &target_crs)
    }

    pub fn apply(&self, grid: &RasterGrid) -> WarpResult<RasterGrid> {
        let target = self.target_grid(grid)?;
        log::info!(
            "Reprojecting {}x{} grid to {} ({}x{} pixels, {:?})",
            grid.ncols(),
            grid.nrows(),
            target.crs,
            target.width,
            target.height,
            target.resolution().as_tuple()
        );
        reproject_to_grid(grid, &target, self.resampling)
    }
}

/// Reproject `grid` as described by `params`; the source grid is left untouched
pub fn reproject(grid: &RasterGrid, params: &ReprojectionParams) -> WarpResult<RasterGrid> {
    Reprojection::new(params.clone())?.apply(grid)
}

/// Resample every spatial variable of `grid` onto `target`
pub fn reproject_to_grid(
    grid: &RasterGrid,
    target: &TargetGrid,
    resampling: ResamplingMethod,
) -> WarpResult<RasterGrid> {
    if !target.transform.is_axis_aligned() {
        return Err(WarpError::InvalidTransform(format!(
            "target transform {:?} is rotated; only axis-aligned target grids are supported",
            target.transform
        )));
    }

    let source_crs = crs_of(grid)?;
    let source_inverse = transform_of(grid)?.inverse()?;
    let positions = source_positions(target, &source_crs, &source_inverse)?;

    let mut output = RasterGrid::new(target.x_coords(), target.y_coords());
    output.name = grid.name.clone();
    output.time = grid.time.clone();
    output.attrs = grid.attrs.clone();
    output.crs = Some(target.crs.clone());

    for (name, variable) in &grid.data_vars {
        let resampled = match variable.spatial_dim_count() {
            2 => resample_variable(variable, &positions, target, resampling)?,
            1 => {
                log::debug!(
                    "Dropping variable '{}': it spans a single spatial axis of the source grid",
                    name
                );
                continue;
            }
            _ => {
                log::debug!("Passing through non-spatial variable '{}'", name);
                variable.clone()
            }
        };
        output.data_vars.insert(name.clone(), resampled);
    }

    for (name, coord) in &grid.coords {
        match coord.spatial_dim_count() {
            2 => {
                let resampled = resample_variable(coord, &positions, target, resampling)?;
                output.coords.insert(name.clone(), resampled);
            }
            1 => log::debug!(
                "Dropping coordinate '{}': it spans a single spatial axis of the source grid",
                name
            ),
            _ => {
                output.coords.insert(name.clone(), coord.clone());
            }
        }
    }

    Ok(output)
}

/// Fractional source `(col, row)` of every target pixel centre, row-major
fn source_positions(
    target: &TargetGrid,
    source_crs: &CoordinateReference,
    source_inverse: &AffineTransform,
) -> WarpResult<Vec<(f64, f64)>> {
    let count = target.width * target.height;
    let mut xs = Vec::with_capacity(count);
    let mut ys = Vec::with_capacity(count);
    for row in 0..target.height {
        for col in 0..target.width {
            let (x, y) = target.transform.apply(col as f64, row as f64);
            xs.push(x);
            ys.push(y);
        }
    }

    let transformer = PointTransformer::new(&target.crs, source_crs)?;
    transformer.transform(&mut xs, &mut ys);

    Ok(xs
        .into_iter()
        .zip(ys)
        .map(|(x, y)| source_inverse.apply(x, y))
        .collect())
}

fn resample_variable(
    variable: &Variable,
    positions: &[(f64, f64)],
    target: &TargetGrid,
    resampling: ResamplingMethod,
) -> WarpResult<Variable> {
    let (outer_shape, slices) = variable.spatial_slices()?;
    let n_slices = slices.len_of(Axis(0));

    let resample_slice = |k: usize| -> Vec<f64> {
        let slice = slices.index_axis(Axis(0), k);
        positions
            .iter()
            .map(|&(col, row)| resampling.sample(&slice, col, row))
            .collect()
    };

    #[cfg(feature = "parallel")]
    let resampled: Vec<Vec<f64>> = (0..n_slices).into_par_iter().map(resample_slice).collect();
    #[cfg(not(feature = "parallel"))]
    let resampled: Vec<Vec<f64>> = (0..n_slices).map(resample_slice).collect();

    let flat: Vec<f64> = resampled.into_iter().flatten().collect();
    let stack = Array3::from_shape_vec((n_slices, target.height, target.width), flat)
        .map_err(|e| WarpError::InvalidGrid(format!("cannot assemble resampled variable: {}", e)))?;

    let mut output = Variable::from_spatial_slices(&variable.dims, &outer_shape, stack)?;
    output.attrs = variable.attrs.clone();
    Ok(output)
}
