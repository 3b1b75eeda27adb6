//! Georeferencing derived from a grid's coordinate arrays or metadata.
//!
//! Coordinates are treated as pixel-centre samples: an axis of `n` values
//! spanning `min..max` has a spacing of `(max - min) / (n - 1)`.

use ndarray::Array1;
use std::collections::BTreeMap;

use crate::core::crs::{
    reproject_bounds, CoordinateReference, CrsFormat, CrsRepresentation, DEFAULT_DENSIFY_POINTS,
};
use crate::types::{
    AffineTransform, BoundingBox, EmbeddedGeoreference, Extent, RasterGrid, Resolution, WarpError,
    WarpResult, TIME_DIM, X_DIM, Y_DIM,
};

impl EmbeddedGeoreference {
    /// Build the vendor representation of a CRS and transform
    pub fn new(crs: &CoordinateReference, transform: &AffineTransform) -> Self {
        let t = transform;
        Self {
            wkt: crs.to_wkt().to_string(),
            i2m: format!("{},{},{},{},{},{}", t.a, t.d, t.b, t.e, t.c, t.f),
        }
    }

    /// Parse the `a,d,b,e,c,f` coefficient string
    pub fn transform(&self) -> WarpResult<AffineTransform> {
        let values = self
            .i2m
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<Vec<f64>, _>>()
            .map_err(|e| {
                WarpError::InvalidTransform(format!("cannot parse i2m '{}': {}", self.i2m, e))
            })?;

        match values.as_slice() {
            &[a, d, b, e, c, f] => Ok(AffineTransform::new(a, b, c, d, e, f)),
            _ => Err(WarpError::InvalidTransform(format!(
                "i2m '{}' has {} coefficients, expected 6",
                self.i2m,
                values.len()
            ))),
        }
    }

    pub fn crs(&self) -> WarpResult<CoordinateReference> {
        CoordinateReference::parse(self.wkt.as_str())
    }
}

impl RasterGrid {
    /// Move an embedded vendor georeference into the canonical CRS field and
    /// coordinate arrays
    pub fn normalize_georeferencing(mut self) -> WarpResult<Self> {
        let embedded = match self.embedded.take() {
            Some(embedded) => embedded,
            None => return Ok(self),
        };

        let transform = embedded.transform()?;
        if !transform.is_axis_aligned() {
            return Err(WarpError::InvalidTransform(format!(
                "rotated transform {:?} cannot be expressed as x/y coordinate arrays",
                transform
            )));
        }

        if self.crs.is_none() {
            self.crs = Some(embedded.crs()?);
        }
        self.x = coordinate_axis(transform.c, transform.a, self.x.len());
        self.y = coordinate_axis(transform.f, transform.e, self.y.len());

        log::debug!("Normalized embedded georeference into {:?}", transform);
        Ok(self)
    }
}

/// Pixel-centre coordinates `origin + step * i` for `i` in `0..count`
pub fn coordinate_axis(origin: f64, step: f64, count: usize) -> Array1<f64> {
    Array1::from_iter((0..count).map(|i| origin + step * i as f64))
}

fn axis_spacing(coords: &Array1<f64>, axis: &str) -> WarpResult<(f64, f64)> {
    let n = coords.len();
    if n < 2 {
        return Err(WarpError::DegenerateGrid(format!(
            "the '{}' axis has {} coordinate(s); at least two pixel centres are needed to derive a resolution",
            axis, n
        )));
    }
    let first = coords[0];
    let last = coords[n - 1];
    Ok(((last - first) / (n - 1) as f64, first))
}

/// Affine transform of a grid, from the embedded vendor georeference when
/// present, otherwise from the coordinate arrays
pub fn transform_of(grid: &RasterGrid) -> WarpResult<AffineTransform> {
    if let Some(embedded) = &grid.embedded {
        return embedded.transform();
    }

    let (a, c) = axis_spacing(&grid.x, X_DIM)?;
    let (e, f) = axis_spacing(&grid.y, Y_DIM)?;
    Ok(AffineTransform::new(a, 0.0, c, 0.0, e, f))
}

/// CRS of a grid if it carries one
pub fn crs_of_opt(grid: &RasterGrid) -> WarpResult<Option<CoordinateReference>> {
    match (&grid.crs, &grid.embedded) {
        (Some(crs), _) => Ok(Some(crs.clone())),
        (None, Some(embedded)) => embedded.crs().map(Some),
        (None, None) => Ok(None),
    }
}

pub fn crs_of(grid: &RasterGrid) -> WarpResult<CoordinateReference> {
    crs_of_opt(grid)?.ok_or_else(|| {
        WarpError::InvalidReference(format!(
            "grid '{}' carries no coordinate reference",
            grid.name.as_deref().unwrap_or("<unnamed>")
        ))
    })
}

pub fn crs_of_as(grid: &RasterGrid, format: CrsFormat) -> WarpResult<CrsRepresentation> {
    crs_of(grid)?.format(format)
}

pub fn nrows(grid: &RasterGrid) -> usize {
    grid.nrows()
}

pub fn ncols(grid: &RasterGrid) -> usize {
    grid.ncols()
}

/// Bounds spanned by the pixel centres, in the grid's own projection
pub fn bounds_of(grid: &RasterGrid) -> WarpResult<BoundingBox> {
    let transform = transform_of(grid)?;
    let last_col = grid.ncols().saturating_sub(1) as f64;
    let last_row = grid.nrows().saturating_sub(1) as f64;

    let corners = [
        transform.apply(0.0, 0.0),
        transform.apply(last_col, 0.0),
        transform.apply(0.0, last_row),
        transform.apply(last_col, last_row),
    ];

    BoundingBox::envelope(corners).ok_or_else(|| {
        WarpError::InvalidTransform(format!("transform {:?} yields non-finite bounds", transform))
    })
}

/// Bounds re-expressed in WGS84 longitude/latitude
pub fn extent_of(grid: &RasterGrid) -> WarpResult<Extent> {
    let bounds = bounds_of(grid)?;
    let crs = crs_of(grid)?;
    if crs.is_geographic() {
        return Ok(Extent::from_lonlat_bounds(&bounds));
    }

    let wgs84 = CoordinateReference::wgs84()?;
    let lonlat = reproject_bounds(&bounds, &crs, &wgs84, DEFAULT_DENSIFY_POINTS)?;
    Ok(Extent::from_lonlat_bounds(&lonlat))
}

pub fn resolution_of(grid: &RasterGrid) -> WarpResult<Resolution> {
    let transform = transform_of(grid)?;
    Ok(Resolution::new(transform.a, transform.e))
}

/// Sizes of the grid's named dimensions: always `x` and `y`, `time` when the
/// grid has a time axis, plus any other dimension a variable spans
pub fn dims_of(grid: &RasterGrid) -> BTreeMap<String, usize> {
    let mut dims = BTreeMap::new();
    dims.insert(X_DIM.to_string(), grid.ncols());
    dims.insert(Y_DIM.to_string(), grid.nrows());
    if let Some(ntime) = grid.ntime() {
        dims.insert(TIME_DIM.to_string(), ntime);
    }
    for variable in grid.data_vars.values().chain(grid.coords.values()) {
        for (dim, &len) in variable.dims.iter().zip(variable.data.shape()) {
            dims.entry(dim.clone()).or_insert(len);
        }
    }
    dims
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{generate_test_grid, TestGrid};
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_transform_from_coordinates() {
        let grid = generate_test_grid(&TestGrid::default()).unwrap();
        let t = transform_of(&grid).unwrap();

        assert_abs_diff_eq!(t.a, 10.0 / 9.0, epsilon = 1e-12);
        assert_abs_diff_eq!(t.e, -10.0 / 19.0, epsilon = 1e-12);
        assert_eq!(t.c, -10.0);
        assert_eq!(t.f, 60.0);
        assert!(t.is_axis_aligned());
    }

    #[test]
    fn test_single_column_grid_fails_fast() {
        let grid = RasterGrid::new(Array1::from(vec![5.0]), Array1::from(vec![1.0, 0.0]));
        match transform_of(&grid) {
            Err(WarpError::DegenerateGrid(msg)) => assert!(msg.contains("'x'")),
            other => panic!("expected a degenerate grid error, got {:?}", other),
        }
    }

    #[test]
    fn test_i2m_parsing() {
        let embedded = EmbeddedGeoreference {
            wkt: String::new(),
            i2m: "0.5, 0.0, 0.0, -0.25, 100.0, 50.0".to_string(),
        };
        let t = embedded.transform().unwrap();
        assert_eq!(t, AffineTransform::new(0.5, 0.0, 100.0, 0.0, -0.25, 50.0));

        let broken = EmbeddedGeoreference { wkt: String::new(), i2m: "1,2,3".to_string() };
        assert!(matches!(broken.transform(), Err(WarpError::InvalidTransform(_))));

        let garbage = EmbeddedGeoreference { wkt: String::new(), i2m: "a,b,c,d,e,f".to_string() };
        assert!(matches!(garbage.transform(), Err(WarpError::InvalidTransform(_))));
    }

    #[test]
    fn test_i2m_roundtrip_is_exact() {
        let crs = CoordinateReference::wgs84().unwrap();
        let t = AffineTransform::from_origin(-10.0, 60.0, 10.0 / 9.0, 10.0 / 19.0);
        let embedded = EmbeddedGeoreference::new(&crs, &t);
        assert_eq!(embedded.transform().unwrap(), t);
    }

    #[test]
    fn test_dims_include_time_only_when_present() {
        let grid = generate_test_grid(&TestGrid::default().ntime(None)).unwrap();
        let dims = dims_of(&grid);
        assert_eq!(dims.len(), 2);
        assert_eq!(dims["x"], 10);
        assert_eq!(dims["y"], 20);
    }

    #[test]
    fn test_grid_without_crs() {
        let mut grid = generate_test_grid(&TestGrid::default()).unwrap();
        grid.crs = None;
        assert!(crs_of_opt(&grid).unwrap().is_none());
        assert!(matches!(crs_of(&grid), Err(WarpError::InvalidReference(_))));
    }
}
