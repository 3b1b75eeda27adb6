//! GDAL-backed grid storage for GeoTIFF and netCDF files.
//!
//! Every `(y, x)` slice of a spatial variable is written as one band. Band
//! metadata records which variable and slice a band holds, dataset metadata
//! records the grid name, time axis, attributes and non-spatial variables, so
//! a saved grid loads back unchanged. Rasters written by other tools load as
//! `band_<n>` variables over `(y, x)`.

use chrono::{DateTime, Utc};
use gdal::raster::Buffer;
use gdal::{Dataset, DriverManager, Metadata};
use ndarray::{Array2, Array3, ArrayD, Axis, IxDyn};
use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;

use crate::core::crs::CoordinateReference;
use crate::core::geometry::{coordinate_axis, crs_of_opt, transform_of};
use crate::io::{GridIo, RasterFormat};
use crate::types::{
    AffineTransform, Attributes, EmbeddedGeoreference, RasterGrid, Variable, WarpError, WarpResult,
    X_DIM, Y_DIM,
};

const KEY_VARIABLE: &str = "VARIABLE";
const KEY_ROLE: &str = "ROLE";
const KEY_DIMS: &str = "DIMS";
const KEY_SHAPE: &str = "SHAPE";
const KEY_SLICE: &str = "SLICE";
const KEY_GRID_NAME: &str = "GRID_NAME";
const KEY_TIME: &str = "TIME";
const ATTR_PREFIX: &str = "ATTR_";
const VAR_PREFIX: &str = "VAR_";
/// Prefix the netCDF driver puts in front of global attributes
const NC_GLOBAL_PREFIX: &str = "NC_GLOBAL#";
/// Prefix the netCDF driver adds to unqualified dataset metadata keys
const GDAL_PREFIX: &str = "GDAL_";

const ROLE_DATA: &str = "data";
const ROLE_COORD: &str = "coord";
const ROLE_PLACEHOLDER: &str = "placeholder";

/// Reads and writes grids through GDAL drivers picked by file extension
#[derive(Debug, Clone, Copy, Default)]
pub struct GdalGridIo;

impl GdalGridIo {
    pub fn new() -> Self {
        Self
    }
}

impl GridIo for GdalGridIo {
    fn load(&self, path: &Path) -> WarpResult<RasterGrid> {
        log::info!("Loading grid from {}", path.display());

        let dataset = Dataset::open(path)?;
        let globals = metadata_map(&dataset);

        // netCDF files with several variables expose them as subdatasets
        let subdatasets = if dataset.raster_count() > 0 {
            Vec::new()
        } else {
            subdataset_names(&dataset)
                .iter()
                .map(|name| Dataset::open(name))
                .collect::<Result<Vec<_>, _>>()?
        };
        let sources: Vec<&Dataset> = if subdatasets.is_empty() {
            vec![&dataset]
        } else {
            subdatasets.iter().collect()
        };

        let first = sources[0];
        if first.raster_count() == 0 {
            return Err(WarpError::InvalidFormat(format!(
                "{} contains no raster bands",
                path.display()
            )));
        }
        let (width, height) = first.raster_size();
        let embedded = embedded_georeference(&globals);

        let transform = match first.geo_transform() {
            Ok(gt) => AffineTransform::from_gdal(&gt),
            Err(e) => {
                if embedded.is_none() {
                    log::warn!(
                        "{} has no geotransform ({}), falling back to pixel coordinates",
                        path.display(),
                        e
                    );
                }
                AffineTransform::new(1.0, 0.0, 0.0, 0.0, -1.0, (height as f64) - 1.0)
            }
        };
        if !transform.is_axis_aligned() {
            return Err(WarpError::InvalidTransform(format!(
                "{} has a rotated geotransform {:?}",
                path.display(),
                transform
            )));
        }

        let mut grid = RasterGrid::new(
            coordinate_axis(transform.c, transform.a, width),
            coordinate_axis(transform.f, transform.e, height),
        );

        let projection = first.projection();
        if !projection.trim().is_empty() {
            grid.crs = Some(CoordinateReference::parse(projection.as_str())?);
        }
        grid.embedded = embedded;

        let fields = strip_global_prefix(&globals);
        grid.name = fields.get(KEY_GRID_NAME).cloned();
        if let Some(time) = fields.get(KEY_TIME) {
            grid.time = Some(parse_time(time)?);
        }
        grid.attrs = prefixed(&fields, ATTR_PREFIX);

        let mut groups: BTreeMap<(String, String), BandGroup> = BTreeMap::new();
        let mut foreign = Vec::new();
        for source in &sources {
            for index in 1..=source.raster_count() {
                let band = source.rasterband(index)?;
                if band.size() != (width, height) {
                    return Err(WarpError::InvalidFormat(format!(
                        "band {} is {:?}, expected {:?}",
                        index,
                        band.size(),
                        (width, height)
                    )));
                }
                let meta = metadata_map(&band);
                if meta.get(KEY_ROLE).map(String::as_str) == Some(ROLE_PLACEHOLDER) {
                    continue;
                }
                let values = band
                    .read_as::<f64>((0, 0), (width, height), (width, height), None)?
                    .data;

                match meta.get(KEY_VARIABLE) {
                    Some(name) => {
                        let role = meta.get(KEY_ROLE).cloned().unwrap_or_else(|| ROLE_DATA.to_string());
                        let slice: usize = parse_field(&meta, KEY_SLICE)?;
                        let group = match groups.entry((role, name.clone())) {
                            Entry::Occupied(entry) => entry.into_mut(),
                            Entry::Vacant(entry) => {
                                entry.insert(BandGroup::from_metadata(&meta)?)
                            }
                        };
                        group.slices.insert(slice, values);
                    }
                    None => foreign.push(values),
                }
            }
        }

        for ((role, name), group) in groups {
            let variable = group.into_variable(&name, height, width)?;
            add_with_role(&mut grid, &role, &name, variable)?;
        }

        for (i, values) in foreign.into_iter().enumerate() {
            let data = Array2::from_shape_vec((height, width), values)
                .map_err(|e| WarpError::InvalidFormat(format!("cannot shape band {}: {}", i + 1, e)))?;
            let name = format!("band_{}", i + 1);
            log::debug!("Loaded foreign band as '{}'", name);
            grid.add_variable(&name, Variable::new(&[Y_DIM, X_DIM], data.into_dyn())?)?;
        }

        for (name, encoded) in prefixed(&fields, VAR_PREFIX) {
            let (role, variable) = decode_variable(&name, &encoded)?;
            add_with_role(&mut grid, &role, &name, variable)?;
        }

        grid.normalize_georeferencing()
    }

    fn save(&self, grid: &RasterGrid, path: &Path) -> WarpResult<()> {
        let format = RasterFormat::from_path(path)?;
        log::info!("Saving grid to {} ({})", path.display(), format);

        let transform = transform_of(grid)?;
        let crs = crs_of_opt(grid)?;
        let (width, height) = (grid.ncols(), grid.nrows());
        let bands = band_plan(grid)?;

        let driver = DriverManager::get_driver_by_name(format.driver_name())?;
        let mut dataset = driver.create_with_band_type::<f64, _>(
            path,
            width as isize,
            height as isize,
            bands.len().max(1) as isize,
        )?;

        dataset.set_geo_transform(&transform.to_gdal())?;
        if let Some(crs) = &crs {
            dataset.set_spatial_ref(&crs.spatial_ref()?)?;
        }
        for (key, value) in dataset_metadata(grid) {
            dataset.set_metadata_item(&global_key(format, &key), &value, "")?;
        }

        if bands.is_empty() {
            let mut band = dataset.rasterband(1)?;
            band.set_metadata_item(KEY_ROLE, ROLE_PLACEHOLDER, "")?;
        }

        for (i, plan) in bands.into_iter().enumerate() {
            let mut band = dataset.rasterband(i as isize + 1)?;
            let buffer = Buffer::new((width, height), plan.values);
            band.write((0, 0), (width, height), &buffer)?;
            band.set_no_data_value(Some(f64::NAN))?;
            for (key, value) in &plan.metadata {
                band.set_metadata_item(key, value, "")?;
            }
        }

        log::debug!("Saved {} to {}", grid.name.as_deref().unwrap_or("grid"), path.display());
        Ok(())
    }
}

/// One band to be written
struct BandPlan {
    metadata: BTreeMap<String, String>,
    values: Vec<f64>,
}

fn band_plan(grid: &RasterGrid) -> WarpResult<Vec<BandPlan>> {
    let mut plan = Vec::new();
    let variables = grid
        .data_vars
        .iter()
        .map(|(name, v)| (ROLE_DATA, name, v))
        .chain(grid.coords.iter().map(|(name, v)| (ROLE_COORD, name, v)));

    for (role, name, variable) in variables {
        if !variable.is_spatial() {
            continue;
        }
        let (_, stack) = variable.spatial_slices()?;
        let (_, rows, cols) = stack.dim();
        if (rows, cols) != (grid.nrows(), grid.ncols()) {
            return Err(WarpError::InvalidGrid(format!(
                "variable '{}' is {}x{}, the grid is {}x{}",
                name,
                cols,
                rows,
                grid.ncols(),
                grid.nrows()
            )));
        }

        for (k, slice) in stack.axis_iter(Axis(0)).enumerate() {
            let mut metadata = BTreeMap::new();
            metadata.insert(KEY_VARIABLE.to_string(), name.clone());
            metadata.insert(KEY_ROLE.to_string(), role.to_string());
            metadata.insert(KEY_DIMS.to_string(), variable.dims.join(","));
            metadata.insert(KEY_SHAPE.to_string(), join(variable.data.shape()));
            metadata.insert(KEY_SLICE.to_string(), k.to_string());
            for (key, value) in &variable.attrs {
                metadata.insert(format!("{}{}", ATTR_PREFIX, key), value.clone());
            }
            plan.push(BandPlan {
                metadata,
                values: slice.iter().cloned().collect(),
            });
        }
    }
    Ok(plan)
}

fn dataset_metadata(grid: &RasterGrid) -> Vec<(String, String)> {
    let mut items = Vec::new();
    if let Some(name) = &grid.name {
        items.push((KEY_GRID_NAME.to_string(), name.clone()));
    }
    if let Some(time) = &grid.time {
        let stamps: Vec<String> = time.iter().map(|t| t.to_rfc3339()).collect();
        items.push((KEY_TIME.to_string(), stamps.join(",")));
    }
    for (key, value) in &grid.attrs {
        items.push((format!("{}{}", ATTR_PREFIX, key), value.clone()));
    }

    let variables = grid
        .data_vars
        .iter()
        .map(|(name, v)| (ROLE_DATA, name, v))
        .chain(grid.coords.iter().map(|(name, v)| (ROLE_COORD, name, v)));
    for (role, name, variable) in variables {
        if !variable.is_spatial() {
            items.push((format!("{}{}", VAR_PREFIX, name), encode_variable(role, variable)));
        }
    }
    items
}

/// `role|dims|shape|values`, lists comma separated
fn encode_variable(role: &str, variable: &Variable) -> String {
    let values: Vec<f64> = variable.data.iter().cloned().collect();
    format!(
        "{}|{}|{}|{}",
        role,
        variable.dims.join(","),
        join(variable.data.shape()),
        join(&values)
    )
}

fn decode_variable(name: &str, encoded: &str) -> WarpResult<(String, Variable)> {
    let parts: Vec<&str> = encoded.split('|').collect();
    let (role, dims, shape, values) = match parts.as_slice() {
        &[role, dims, shape, values] => (role, dims, shape, values),
        _ => {
            return Err(WarpError::InvalidFormat(format!(
                "variable '{}' has a malformed encoding '{}'",
                name, encoded
            )))
        }
    };

    let dims: Vec<&str> = dims.split(',').filter(|d| !d.is_empty()).collect();
    let shape: Vec<usize> = parse_list(shape, name)?;
    let values: Vec<f64> = parse_list(values, name)?;
    let data = ArrayD::from_shape_vec(IxDyn(&shape), values)
        .map_err(|e| WarpError::InvalidFormat(format!("variable '{}': {}", name, e)))?;
    Ok((role.to_string(), Variable::new(&dims, data)?))
}

/// Band slices of one variable collected while loading
struct BandGroup {
    dims: Vec<String>,
    shape: Vec<usize>,
    attrs: Attributes,
    slices: BTreeMap<usize, Vec<f64>>,
}

impl BandGroup {
    fn from_metadata(meta: &BTreeMap<String, String>) -> WarpResult<Self> {
        let dims = meta
            .get(KEY_DIMS)
            .map(|d| d.split(',').map(str::to_string).collect())
            .unwrap_or_else(|| vec![Y_DIM.to_string(), X_DIM.to_string()]);
        let shape = match meta.get(KEY_SHAPE) {
            Some(shape) => parse_list(shape, KEY_SHAPE)?,
            None => Vec::new(),
        };
        Ok(Self {
            dims,
            shape,
            attrs: prefixed(meta, ATTR_PREFIX),
            slices: BTreeMap::new(),
        })
    }

    fn into_variable(self, name: &str, height: usize, width: usize) -> WarpResult<Variable> {
        let outer_shape: Vec<usize> = if self.shape.is_empty() {
            Vec::new()
        } else {
            if self.shape.len() != self.dims.len() {
                return Err(WarpError::InvalidFormat(format!(
                    "variable '{}' lists {} dims but a {}-dimensional shape",
                    name,
                    self.dims.len(),
                    self.shape.len()
                )));
            }
            self.dims
                .iter()
                .zip(&self.shape)
                .filter(|(d, _)| d.as_str() != X_DIM && d.as_str() != Y_DIM)
                .map(|(_, &n)| n)
                .collect()
        };

        let count: usize = outer_shape.iter().product();
        if self.slices.len() != count || self.slices.keys().any(|&k| k >= count) {
            return Err(WarpError::InvalidFormat(format!(
                "variable '{}' has {} of {} slices",
                name,
                self.slices.len(),
                count
            )));
        }

        let flat: Vec<f64> = self.slices.into_values().flatten().collect();
        let stack = Array3::from_shape_vec((count, height, width), flat)
            .map_err(|e| WarpError::InvalidFormat(format!("variable '{}': {}", name, e)))?;
        let mut variable = Variable::from_spatial_slices(&self.dims, &outer_shape, stack)?;
        variable.attrs = self.attrs;
        Ok(variable)
    }
}

fn add_with_role(grid: &mut RasterGrid, role: &str, name: &str, variable: Variable) -> WarpResult<()> {
    match role {
        ROLE_COORD => grid.add_coord(name, variable),
        _ => grid.add_variable(name, variable),
    }
}

fn metadata_map<M: Metadata>(object: &M) -> BTreeMap<String, String> {
    object
        .metadata_domain("")
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| {
            let (key, value) = item.split_once('=')?;
            Some((key.to_string(), value.to_string()))
        })
        .collect()
}

fn subdataset_names(dataset: &Dataset) -> Vec<String> {
    dataset
        .metadata_domain("SUBDATASETS")
        .unwrap_or_default()
        .into_iter()
        .filter_map(|item| {
            let (key, value) = item.split_once('=')?;
            key.ends_with("_NAME").then(|| value.to_string())
        })
        .collect()
}

/// Dataset metadata key under which `key` becomes a plain global attribute
fn global_key(format: RasterFormat, key: &str) -> String {
    match format {
        RasterFormat::NetCdf => format!("{}{}", NC_GLOBAL_PREFIX, key),
        _ => key.to_string(),
    }
}

fn strip_global_prefix(globals: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    globals
        .iter()
        .map(|(k, v)| (own_key(k.strip_prefix(NC_GLOBAL_PREFIX).unwrap_or(k)).to_string(), v.clone()))
        .collect()
}

/// Undo the `GDAL_` prefix on keys this module writes
fn own_key(key: &str) -> &str {
    match key.strip_prefix(GDAL_PREFIX) {
        Some(rest)
            if rest == KEY_GRID_NAME
                || rest == KEY_TIME
                || rest.starts_with(ATTR_PREFIX)
                || rest.starts_with(VAR_PREFIX) =>
        {
            rest
        }
        _ => key,
    }
}

fn prefixed(fields: &BTreeMap<String, String>, prefix: &str) -> BTreeMap<String, String> {
    fields
        .iter()
        .filter_map(|(k, v)| k.strip_prefix(prefix).map(|k| (k.to_string(), v.clone())))
        .collect()
}

/// Vendor georeferencing stored as `<prefix>i2m` next to `<prefix>crs` (or
/// `wkt`, `spatial_ref`), as GDAL exposes the attributes of a netCDF `crs`
/// variable
fn embedded_georeference(globals: &BTreeMap<String, String>) -> Option<EmbeddedGeoreference> {
    let (key, i2m) = globals
        .iter()
        .find(|(k, _)| k.as_str() == "i2m" || k.ends_with("#i2m"))?;
    let prefix = &key[..key.len() - "i2m".len()];
    let wkt = ["crs", "wkt", "spatial_ref"]
        .iter()
        .find_map(|name| globals.get(&format!("{}{}", prefix, name)))?;

    log::debug!("Found embedded georeference under '{}'", key);
    Some(EmbeddedGeoreference {
        wkt: wkt.clone(),
        i2m: i2m.clone(),
    })
}

fn parse_time(text: &str) -> WarpResult<Vec<DateTime<Utc>>> {
    text.split(',')
        .filter(|t| !t.trim().is_empty())
        .map(|t| {
            DateTime::parse_from_rfc3339(t.trim())
                .map(|t| t.with_timezone(&Utc))
                .map_err(|e| WarpError::InvalidFormat(format!("invalid timestamp '{}': {}", t, e)))
        })
        .collect()
}

fn parse_field<T>(meta: &BTreeMap<String, String>, key: &str) -> WarpResult<T>
where
    T: FromStr,
    T::Err: Display,
{
    let value = meta
        .get(key)
        .ok_or_else(|| WarpError::InvalidFormat(format!("band metadata lacks '{}'", key)))?;
    value
        .trim()
        .parse()
        .map_err(|e| WarpError::InvalidFormat(format!("invalid {} '{}': {}", key, value, e)))
}

fn parse_list<T>(text: &str, context: &str) -> WarpResult<Vec<T>>
where
    T: FromStr,
    T::Err: Display,
{
    text.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse()
                .map_err(|e| WarpError::InvalidFormat(format!("invalid value '{}' in {}: {}", v, context, e)))
        })
        .collect()
}

fn join<T: ToString>(values: &[T]) -> String {
    values.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(",")
}
