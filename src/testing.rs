//! Synthetic grids for tests and examples.
//!
//! Values are deterministic so results can be compared exactly across runs.

use chrono::{DateTime, TimeZone, Utc};
use ndarray::{Array3, ArrayD};

use crate::core::crs::{CoordinateReference, CrsDefinition};
use crate::core::geometry::{coordinate_axis, crs_of, transform_of};
use crate::types::{
    BoundingBox, EmbeddedGeoreference, RasterGrid, Variable, WarpError, WarpResult, TIME_DIM, X_DIM,
    Y_DIM,
};

/// 2017-01-01T00:00:00Z
const FIRST_TIMESTAMP: i64 = 1_483_228_800;
const SECONDS_PER_DAY: i64 = 86_400;

/// Parameters of a synthetic grid
#[derive(Debug, Clone)]
pub struct TestGrid {
    pub nx: usize,
    pub ny: usize,
    /// Number of daily time steps, no time axis when `None`
    pub ntime: Option<usize>,
    pub crs: CrsDefinition,
    /// Bounds of the outer pixel centres
    pub extent: BoundingBox,
    pub variables: Vec<String>,
    pub name: Option<String>,
}

impl Default for TestGrid {
    fn default() -> Self {
        Self {
            nx: 10,
            ny: 20,
            ntime: Some(1),
            crs: CrsDefinition::Code(4326),
            extent: BoundingBox::new(-10.0, 50.0, 0.0, 60.0),
            variables: vec!["C11".to_string(), "C22".to_string()],
            name: None,
        }
    }
}

impl TestGrid {
    pub fn shape(mut self, nx: usize, ny: usize) -> Self {
        self.nx = nx;
        self.ny = ny;
        self
    }

    pub fn ntime(mut self, ntime: Option<usize>) -> Self {
        self.ntime = ntime;
        self
    }

    pub fn crs(mut self, crs: impl Into<CrsDefinition>) -> Self {
        self.crs = crs.into();
        self
    }

    pub fn extent(mut self, left: f64, bottom: f64, right: f64, top: f64) -> Self {
        self.extent = BoundingBox::new(left, bottom, right, top);
        self
    }

    pub fn variables<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        self.variables = names.iter().map(|n| n.as_ref().to_string()).collect();
        self
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// Build a north-up grid; variables span `(time, y, x)` or `(y, x)`
pub fn generate_test_grid(params: &TestGrid) -> WarpResult<RasterGrid> {
    let (nx, ny) = (params.nx, params.ny);
    let extent = &params.extent;
    let step_x = extent.width() / nx.saturating_sub(1).max(1) as f64;
    let step_y = extent.height() / ny.saturating_sub(1).max(1) as f64;

    let mut grid = RasterGrid::new(
        coordinate_axis(extent.left, step_x, nx),
        coordinate_axis(extent.top, -step_y, ny),
    )
    .with_crs(CoordinateReference::parse(params.crs.clone())?);

    if let Some(name) = &params.name {
        grid = grid.with_name(name);
    }
    if let Some(ntime) = params.ntime {
        grid = grid.with_time(daily_timestamps(ntime)?);
    }

    let ntime = params.ntime.unwrap_or(1);
    for (v, name) in params.variables.iter().enumerate() {
        let data = Array3::from_shape_fn((ntime, ny, nx), |(t, r, c)| {
            (v as f64 + 1.0) * 100.0 + t as f64 * 10.0 + r as f64 * 0.5 + c as f64 * 0.1
        });
        let variable = match params.ntime {
            Some(_) => Variable::new(&[TIME_DIM, Y_DIM, X_DIM], data.into_dyn())?,
            None => {
                let data: ArrayD<f64> = data.index_axis_move(ndarray::Axis(0), 0).into_dyn();
                Variable::new(&[Y_DIM, X_DIM], data)?
            }
        };
        grid.add_variable(name, variable.with_attr("units", "dB"))?;
    }

    Ok(grid)
}

/// Replace the grid's CRS and coordinates-derived transform by the vendor
/// side-channel (WKT plus `i2m` coefficients)
pub fn to_embedded_georeference(grid: &RasterGrid) -> WarpResult<RasterGrid> {
    let crs = crs_of(grid)?;
    let transform = transform_of(grid)?;
    let mut embedded = grid.clone();
    embedded.crs = None;
    embedded.embedded = Some(EmbeddedGeoreference::new(&crs, &transform));
    Ok(embedded)
}

fn daily_timestamps(count: usize) -> WarpResult<Vec<DateTime<Utc>>> {
    (0..count)
        .map(|i| {
            Utc.timestamp_opt(FIRST_TIMESTAMP + i as i64 * SECONDS_PER_DAY, 0)
                .single()
                .ok_or_else(|| WarpError::InvalidGrid(format!("time step {} is out of range", i)))
        })
        .collect()
}
