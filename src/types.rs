use chrono::{DateTime, Utc};
use ndarray::{Array1, Array3, ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::crs::CoordinateReference;

/// Name of the column (easting / longitude) dimension
pub const X_DIM: &str = "x";
/// Name of the row (northing / latitude) dimension
pub const Y_DIM: &str = "y";
/// Name of the optional temporal dimension
pub const TIME_DIM: &str = "time";

/// Sample type of every gridded variable
pub type GridValue = f64;

/// N-dimensional array holding the samples of one variable
pub type GridArray = ArrayD<GridValue>;

/// Free-form string attributes attached to grids and variables
pub type Attributes = BTreeMap<String, String>;

/// Affine pixel-to-map transform.
///
/// `x = a * col + b * row + c` and `y = d * col + e * row + f`, where
/// `(col, row)` addresses pixel centres.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    pub fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// North-up transform whose first pixel centre sits at `(left, top)`
    pub fn from_origin(left: f64, top: f64, res_x: f64, res_y: f64) -> Self {
        Self::new(res_x, 0.0, left, 0.0, -res_y, top)
    }

    /// True when the grid has no rotation or shear terms
    pub fn is_axis_aligned(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    /// Map pixel `(col, row)` to map coordinates
    #[inline]
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// Inverse transform mapping map coordinates back to fractional pixels
    pub fn inverse(&self) -> WarpResult<AffineTransform> {
        let det = self.a * self.e - self.b * self.d;
        if det == 0.0 || !det.is_finite() {
            return Err(WarpError::InvalidTransform(format!(
                "transform {:?} is not invertible", self
            )));
        }

        let a = self.e / det;
        let b = -self.b / det;
        let d = -self.d / det;
        let e = self.a / det;
        let c = -(a * self.c + b * self.f);
        let f = -(d * self.c + e * self.f);

        Ok(AffineTransform::new(a, b, c, d, e, f))
    }

    /// GDAL geotransform (`[c, a, b, f, d, e]`) anchored at the outer corner of
    /// the first pixel rather than at its centre.
    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.c - 0.5 * self.a - 0.5 * self.b,
            self.a,
            self.b,
            self.f - 0.5 * self.d - 0.5 * self.e,
            self.d,
            self.e,
        ]
    }

    /// Inverse of [`AffineTransform::to_gdal`]
    pub fn from_gdal(gt: &[f64; 6]) -> Self {
        Self::new(
            gt[1],
            gt[2],
            gt[0] + 0.5 * gt[1] + 0.5 * gt[2],
            gt[4],
            gt[5],
            gt[3] + 0.5 * gt[4] + 0.5 * gt[5],
        )
    }

    pub fn coefficients(&self) -> [f64; 6] {
        [self.a, self.b, self.c, self.d, self.e, self.f]
    }
}

/// Rectangle in a grid's own projection units.
///
/// Always normalized so that `left <= right` and `bottom <= top`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl BoundingBox {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        Self {
            left: left.min(right),
            bottom: bottom.min(top),
            right: left.max(right),
            top: bottom.max(top),
        }
    }

    /// Envelope of a set of points, ignoring non-finite ones
    pub fn envelope<I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, f64)>,
    {
        let mut bounds: Option<BoundingBox> = None;
        for (x, y) in points {
            if !x.is_finite() || !y.is_finite() {
                continue;
            }
            bounds = Some(match bounds {
                None => BoundingBox::new(x, y, x, y),
                Some(b) => BoundingBox {
                    left: b.left.min(x),
                    bottom: b.bottom.min(y),
                    right: b.right.max(x),
                    top: b.top.max(y),
                },
            });
        }
        bounds
    }

    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            left: self.left.min(other.left),
            bottom: self.bottom.min(other.bottom),
            right: self.right.max(other.right),
            top: self.top.max(other.top),
        }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.top - self.bottom
    }

    /// `(left, bottom, right, top)`
    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.left, self.bottom, self.right, self.top)
    }
}

impl From<(f64, f64, f64, f64)> for BoundingBox {
    fn from((left, bottom, right, top): (f64, f64, f64, f64)) -> Self {
        BoundingBox::new(left, bottom, right, top)
    }
}

/// Rectangle in geographic longitude/latitude degrees.
///
/// Kept apart from [`BoundingBox`]: extents of grids in different projections
/// can be unioned, projected bounds cannot.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Extent {
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
    pub top: f64,
}

impl Extent {
    pub fn new(left: f64, bottom: f64, right: f64, top: f64) -> Self {
        let b = BoundingBox::new(left, bottom, right, top);
        Self::from_lonlat_bounds(&b)
    }

    /// Reinterpret bounds that are already in longitude/latitude
    pub fn from_lonlat_bounds(bounds: &BoundingBox) -> Self {
        Self {
            left: bounds.left,
            bottom: bounds.bottom,
            right: bounds.right,
            top: bounds.top,
        }
    }

    pub fn union(&self, other: &Extent) -> Extent {
        Extent {
            left: self.left.min(other.left),
            bottom: self.bottom.min(other.bottom),
            right: self.right.max(other.right),
            top: self.top.max(other.top),
        }
    }

    pub fn as_bounds(&self) -> BoundingBox {
        BoundingBox::new(self.left, self.bottom, self.right, self.top)
    }

    pub fn as_tuple(&self) -> (f64, f64, f64, f64) {
        (self.left, self.bottom, self.right, self.top)
    }
}

/// Pixel size along x and y, always non-negative
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub x: f64,
    pub y: f64,
}

impl Resolution {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x: x.abs(), y: y.abs() }
    }

    pub fn as_tuple(&self) -> (f64, f64) {
        (self.x, self.y)
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.x > 0.0 && self.y > 0.0
    }
}

impl From<f64> for Resolution {
    fn from(res: f64) -> Self {
        Resolution::new(res, res)
    }
}

impl From<(f64, f64)> for Resolution {
    fn from((x, y): (f64, f64)) -> Self {
        Resolution::new(x, y)
    }
}

/// One named array over a list of named dimensions
#[derive(Debug, Clone, PartialEq)]
pub struct Variable {
    pub dims: Vec<String>,
    pub data: GridArray,
    pub attrs: Attributes,
}

impl Variable {
    pub fn new<S: AsRef<str>>(dims: &[S], data: GridArray) -> WarpResult<Self> {
        if dims.len() != data.ndim() {
            return Err(WarpError::InvalidGrid(format!(
                "{} dimension name(s) given for a {}-dimensional array",
                dims.len(),
                data.ndim()
            )));
        }

        Ok(Self {
            dims: dims.iter().map(|d| d.as_ref().to_string()).collect(),
            data,
            attrs: Attributes::new(),
        })
    }

    /// Zero-dimensional variable holding a single value
    pub fn scalar(value: GridValue) -> Self {
        Self {
            dims: Vec::new(),
            data: ArrayD::from_elem(IxDyn(&[]), value),
            attrs: Attributes::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: &str) -> Self {
        self.attrs.insert(key.to_string(), value.to_string());
        self
    }

    pub fn axis_of(&self, dim: &str) -> Option<usize> {
        self.dims.iter().position(|d| d == dim)
    }

    pub fn has_dim(&self, dim: &str) -> bool {
        self.axis_of(dim).is_some()
    }

    /// True when the variable spans both `y` and `x`
    pub fn is_spatial(&self) -> bool {
        self.has_dim(Y_DIM) && self.has_dim(X_DIM)
    }

    /// Number of spatial dimensions (0, 1 or 2) the variable spans
    pub fn spatial_dim_count(&self) -> usize {
        self.dims
            .iter()
            .filter(|d| d.as_str() == X_DIM || d.as_str() == Y_DIM)
            .count()
    }

    /// Split the data into `(y, x)` slices stacked along the first axis.
    ///
    /// Returns the sizes of the non-spatial dimensions (in their original
    /// order) together with the stack; slices follow the row-major order of
    /// those dimensions.
    pub fn spatial_slices(&self) -> WarpResult<(Vec<usize>, Array3<GridValue>)> {
        let order = stack_order(&self.dims)?;
        let shape = self.data.shape();
        let outer_shape: Vec<usize> = order[..order.len() - 2].iter().map(|&i| shape[i]).collect();
        let rows = shape[order[order.len() - 2]];
        let cols = shape[order[order.len() - 1]];

        let stack = self
            .data
            .view()
            .permuted_axes(order)
            .as_standard_layout()
            .into_owned()
            .into_shape((outer_shape.iter().product(), rows, cols))
            .map_err(|e| WarpError::InvalidGrid(format!("cannot stack spatial slices: {}", e)))?;
        Ok((outer_shape, stack))
    }

    /// Inverse of [`Variable::spatial_slices`]; the spatial size is taken from
    /// the stack
    pub fn from_spatial_slices<S: AsRef<str>>(
        dims: &[S],
        outer_shape: &[usize],
        stack: Array3<GridValue>,
    ) -> WarpResult<Self> {
        let dims: Vec<String> = dims.iter().map(|d| d.as_ref().to_string()).collect();
        let order = stack_order(&dims)?;
        let (count, rows, cols) = stack.dim();
        if outer_shape.len() != order.len() - 2 || outer_shape.iter().product::<usize>() != count {
            return Err(WarpError::InvalidGrid(format!(
                "{} slice(s) do not fill the non-spatial shape {:?}",
                count, outer_shape
            )));
        }

        let mut stacked_shape = outer_shape.to_vec();
        stacked_shape.push(rows);
        stacked_shape.push(cols);
        let flat: Vec<GridValue> = stack.iter().cloned().collect();
        let stacked = ArrayD::from_shape_vec(IxDyn(&stacked_shape), flat)
            .map_err(|e| WarpError::InvalidGrid(format!("cannot unstack spatial slices: {}", e)))?;

        let mut inverse = vec![0; order.len()];
        for (position, &axis) in order.iter().enumerate() {
            inverse[axis] = position;
        }
        let data = stacked.permuted_axes(inverse).as_standard_layout().into_owned();

        Ok(Self {
            dims,
            data,
            attrs: Attributes::new(),
        })
    }
}

/// Axis order moving `y` and `x` last, other axes keeping their order
fn stack_order(dims: &[String]) -> WarpResult<Vec<usize>> {
    let y_axis = dims.iter().position(|d| d == Y_DIM);
    let x_axis = dims.iter().position(|d| d == X_DIM);
    match (y_axis, x_axis) {
        (Some(y), Some(x)) => {
            let mut order: Vec<usize> = (0..dims.len()).filter(|&i| i != y && i != x).collect();
            order.push(y);
            order.push(x);
            Ok(order)
        }
        _ => Err(WarpError::InvalidGrid(format!(
            "dimensions {:?} do not include both '{}' and '{}'",
            dims, Y_DIM, X_DIM
        ))),
    }
}

/// Vendor georeferencing side-channel: the CRS as WKT plus an "image to model"
/// coefficient string `a,d,b,e,c,f`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddedGeoreference {
    pub wkt: String,
    pub i2m: String,
}

/// Collection of variables sharing the `y`/`x` grid (and optionally `time`).
///
/// Coordinates are pixel-centre samples. Data variables are resampled on
/// reprojection; coordinate variables describe the grid and are repositioned
/// or passed through.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterGrid {
    pub name: Option<String>,
    pub x: Array1<f64>,
    pub y: Array1<f64>,
    pub time: Option<Vec<DateTime<Utc>>>,
    pub data_vars: BTreeMap<String, Variable>,
    pub coords: BTreeMap<String, Variable>,
    pub attrs: Attributes,
    pub crs: Option<CoordinateReference>,
    pub embedded: Option<EmbeddedGeoreference>,
}

impl RasterGrid {
    pub fn new(x: Array1<f64>, y: Array1<f64>) -> Self {
        Self {
            name: None,
            x,
            y,
            time: None,
            data_vars: BTreeMap::new(),
            coords: BTreeMap::new(),
            attrs: Attributes::new(),
            crs: None,
            embedded: None,
        }
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }

    pub fn with_time(mut self, time: Vec<DateTime<Utc>>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_crs(mut self, crs: CoordinateReference) -> Self {
        self.crs = Some(crs);
        self
    }

    pub fn with_embedded_georeference(mut self, embedded: EmbeddedGeoreference) -> Self {
        self.embedded = Some(embedded);
        self
    }

    pub fn with_variable(mut self, name: &str, variable: Variable) -> WarpResult<Self> {
        self.add_variable(name, variable)?;
        Ok(self)
    }

    pub fn with_coord(mut self, name: &str, variable: Variable) -> WarpResult<Self> {
        self.add_coord(name, variable)?;
        Ok(self)
    }

    pub fn add_variable(&mut self, name: &str, variable: Variable) -> WarpResult<()> {
        self.check_shape(name, &variable)?;
        self.data_vars.insert(name.to_string(), variable);
        Ok(())
    }

    pub fn add_coord(&mut self, name: &str, variable: Variable) -> WarpResult<()> {
        self.check_shape(name, &variable)?;
        self.coords.insert(name.to_string(), variable);
        Ok(())
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.data_vars.get(name)
    }

    pub fn ncols(&self) -> usize {
        self.x.len()
    }

    pub fn nrows(&self) -> usize {
        self.y.len()
    }

    pub fn ntime(&self) -> Option<usize> {
        self.time.as_ref().map(|t| t.len())
    }

    /// Size of a named dimension, looking at the coordinate axes first and
    /// then at the variables for non-spatial dimensions
    pub fn dim_size(&self, dim: &str) -> Option<usize> {
        match dim {
            X_DIM => Some(self.ncols()),
            Y_DIM => Some(self.nrows()),
            TIME_DIM if self.time.is_some() => self.ntime(),
            _ => self
                .data_vars
                .values()
                .chain(self.coords.values())
                .find_map(|v| v.axis_of(dim).map(|axis| v.data.shape()[axis])),
        }
    }

    fn check_shape(&self, name: &str, variable: &Variable) -> WarpResult<()> {
        for (dim, &len) in variable.dims.iter().zip(variable.data.shape()) {
            if dim == TIME_DIM && self.time.is_none() {
                return Err(WarpError::InvalidGrid(format!(
                    "variable '{}' spans '{}' but the grid has no time axis",
                    name, TIME_DIM
                )));
            }
            if let Some(expected) = self.dim_size(dim) {
                if expected != len {
                    return Err(WarpError::InvalidGrid(format!(
                        "variable '{}' has {} entries along '{}', the grid has {}",
                        name, len, dim, expected
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Error types for grid georeferencing, reprojection and alignment
#[derive(Debug, thiserror::Error)]
pub enum WarpError {
    #[error("Invalid coordinate reference: {0}")]
    InvalidReference(String),

    #[error("Projection mismatch: {0}")]
    ProjectionMismatch(String),

    #[error("Underspecified target grid: {0}")]
    UnderspecifiedTargetGrid(String),

    #[error("{0}")]
    InvalidMode(String),

    #[error("Degenerate grid: {0}")]
    DegenerateGrid(String),

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Invalid transform: {0}")]
    InvalidTransform(String),

    #[error("Empty collection: {0}")]
    EmptyCollection(String),

    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),
}

/// Result type for warp operations
pub type WarpResult<T> = Result<T, WarpError>;
