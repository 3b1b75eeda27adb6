//! Co-registration of many grids onto one shared target grid.
//!
//! The shared geometry is resolved once, up front, and is read-only while the
//! per-grid load/reproject/save work runs. A failure in one item is reported
//! for that item only.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::core::common::{common_bounds, common_resolution, ResolutionMode};
use crate::core::crs::{reproject_bounds, CoordinateReference, CrsDefinition, DEFAULT_DENSIFY_POINTS};
use crate::core::geometry::{bounds_of, crs_of, resolution_of};
use crate::core::reproject::{pixel_count, reproject_to_grid, TargetGrid};
use crate::core::resample::ResamplingMethod;
use crate::io::{GridIo, RasterFormat};
use crate::types::{BoundingBox, RasterGrid, Resolution, WarpError, WarpResult, X_DIM, Y_DIM};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

/// How the shared resolution is chosen
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub enum ResolutionPolicy {
    /// Resolution of the first grid, expressed in the target CRS
    #[default]
    FirstGrid,
    /// Aggregate over all grids (requires one shared projection)
    Common(ResolutionMode),
    Fixed(Resolution),
}

/// Alignment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlignmentConfig {
    /// Shared bounds in target CRS units, the common bounds of all grids when absent
    pub extent: Option<BoundingBox>,
    /// Target CRS, the first grid's CRS when absent
    pub crs: Option<CrsDefinition>,
    pub resolution: ResolutionPolicy,
    pub resampling: ResamplingMethod,
    /// Format for grids that did not come from a file
    pub output_format: RasterFormat,
    pub suffix: String,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            extent: None,
            crs: None,
            resolution: ResolutionPolicy::default(),
            resampling: ResamplingMethod::default(),
            output_format: RasterFormat::default(),
            suffix: "_aligned".to_string(),
        }
    }
}

/// A batch member: an in-memory grid or a file to load
#[derive(Debug, Clone)]
pub enum AlignInput {
    Grid(RasterGrid),
    Path(PathBuf),
}

impl From<RasterGrid> for AlignInput {
    fn from(grid: RasterGrid) -> Self {
        AlignInput::Grid(grid)
    }
}

impl From<PathBuf> for AlignInput {
    fn from(path: PathBuf) -> Self {
        AlignInput::Path(path)
    }
}

impl From<&Path> for AlignInput {
    fn from(path: &Path) -> Self {
        AlignInput::Path(path.to_path_buf())
    }
}

impl From<&str> for AlignInput {
    fn from(path: &str) -> Self {
        AlignInput::Path(PathBuf::from(path))
    }
}

/// One aligned batch member
#[derive(Debug, Clone)]
pub struct AlignedGrid {
    /// Position in the input batch
    pub index: usize,
    /// Input file, when the member was given as a path
    pub source: Option<PathBuf>,
    /// Where the aligned grid was written
    pub path: PathBuf,
    pub grid: RasterGrid,
}

/// Outcome of an alignment run, in input order
#[derive(Debug)]
pub struct AlignmentReport {
    pub target: TargetGrid,
    pub items: Vec<WarpResult<AlignedGrid>>,
}

impl AlignmentReport {
    pub fn succeeded(&self) -> impl Iterator<Item = &AlignedGrid> {
        self.items.iter().filter_map(|item| item.as_ref().ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = (usize, &WarpError)> {
        self.items
            .iter()
            .enumerate()
            .filter_map(|(i, item)| item.as_ref().err().map(|e| (i, e)))
    }

    pub fn is_complete(&self) -> bool {
        self.items.iter().all(|item| item.is_ok())
    }

    /// Aligned grids in input order, or the first failure
    pub fn into_grids(self) -> WarpResult<Vec<RasterGrid>> {
        self.items.into_iter().map(|item| item.map(|a| a.grid)).collect()
    }
}

/// A loaded batch member
struct Member {
    index: usize,
    source: Option<PathBuf>,
    grid: RasterGrid,
}

pub struct Alignment {
    config: AlignmentConfig,
}

impl Alignment {
    pub fn new(config: AlignmentConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AlignmentConfig {
        &self.config
    }

    /// Load, reproject and save every input onto one shared grid under
    /// `output_dir`
    pub fn apply(
        &self,
        inputs: Vec<AlignInput>,
        output_dir: &Path,
        io: &dyn GridIo,
    ) -> WarpResult<AlignmentReport> {
        if inputs.is_empty() {
            return Err(WarpError::EmptyCollection("align needs at least one grid".to_string()));
        }
        std::fs::create_dir_all(output_dir)?;

        let loaded = load_all(inputs, io);
        let members: Vec<&Member> = loaded.iter().filter_map(|m| m.as_ref().ok()).collect();
        if members.is_empty() {
            return Err(WarpError::EmptyCollection(
                "none of the inputs could be loaded".to_string(),
            ));
        }

        let grids: Vec<RasterGrid> = members.iter().map(|m| m.grid.clone()).collect();
        let target = self.resolve_target(&grids)?;
        log::info!(
            "Aligning {} grid(s) onto {}x{} pixels in {} with bounds {:?}",
            loaded.len(),
            target.width,
            target.height,
            target.crs,
            target.bounds().as_tuple()
        );

        let names = self.output_names(&loaded);
        let process = |(member, name): (WarpResult<Member>, Option<String>)| -> WarpResult<AlignedGrid> {
            let member = member?;
            let aligned = reproject_to_grid(&member.grid, &target, self.config.resampling)?;
            let name = name.unwrap_or_else(|| self.output_name(&member));
            let path = output_dir.join(name);
            io.save(&aligned, &path)?;
            Ok(AlignedGrid {
                index: member.index,
                source: member.source,
                path,
                grid: aligned,
            })
        };

        #[cfg(feature = "parallel")]
        let items: Vec<WarpResult<AlignedGrid>> =
            loaded.into_par_iter().zip(names).map(process).collect();
        #[cfg(not(feature = "parallel"))]
        let items: Vec<WarpResult<AlignedGrid>> = loaded.into_iter().zip(names).map(process).collect();

        for (index, item) in items.iter().enumerate() {
            match item {
                Ok(aligned) => log::info!("Aligned input {} -> {}", index, aligned.path.display()),
                Err(e) => log::warn!("Failed to align input {}: {}", index, e),
            }
        }

        Ok(AlignmentReport { target, items })
    }

    /// Shared target grid for a batch of grids
    pub fn resolve_target(&self, grids: &[RasterGrid]) -> WarpResult<TargetGrid> {
        let first = grids
            .first()
            .ok_or_else(|| WarpError::EmptyCollection("align needs at least one grid".to_string()))?;

        let crs = match &self.config.crs {
            Some(definition) => CoordinateReference::parse(definition.clone())?,
            None => crs_of(first)?,
        };

        let extent = match self.config.extent {
            Some(extent) => extent,
            None => common_bounds(grids, Some(&crs))?,
        };

        let res = match self.config.resolution {
            ResolutionPolicy::Fixed(res) => res,
            ResolutionPolicy::Common(mode) => {
                let res = common_resolution(grids, mode)?;
                let source_crs = crs_of(first)?;
                if source_crs == crs {
                    res
                } else {
                    let bounds = common_bounds(grids, None)?;
                    resolution_in_crs(res, &bounds, &source_crs, &crs)?
                }
            }
            ResolutionPolicy::FirstGrid => {
                let source_crs = crs_of(first)?;
                let res = resolution_of(first)?;
                if source_crs == crs {
                    res
                } else {
                    resolution_in_crs(res, &bounds_of(first)?, &source_crs, &crs)?
                }
            }
        };
        if !res.is_valid() {
            return Err(WarpError::InvalidGrid(format!(
                "shared resolution {:?} must be positive and finite",
                res.as_tuple()
            )));
        }

        // Counts from the resolution, then the exact resolution from the extent
        let width = pixel_count(extent.width(), res.x, X_DIM)?;
        let height = pixel_count(extent.height(), res.y, Y_DIM)?;
        TargetGrid::from_extent_and_shape(crs, &extent, width, height)
    }

    fn output_name(&self, member: &Member) -> String {
        let (stem, format) = self.name_parts(member);
        self.file_name(&stem, format)
    }

    /// Output file names for every loaded member, in input order.
    ///
    /// Members that would write to the same file get their input index
    /// appended to the stem.
    fn output_names(&self, loaded: &[WarpResult<Member>]) -> Vec<Option<String>> {
        let parts: Vec<Option<(usize, String, RasterFormat)>> = loaded
            .iter()
            .map(|member| {
                member.as_ref().ok().map(|m| {
                    let (stem, format) = self.name_parts(m);
                    (m.index, stem, format)
                })
            })
            .collect();

        let mut counts: HashMap<String, usize> = HashMap::new();
        for (_, stem, format) in parts.iter().flatten() {
            *counts.entry(self.file_name(stem, *format)).or_default() += 1;
        }

        parts
            .into_iter()
            .map(|part| {
                part.map(|(index, stem, format)| {
                    let name = self.file_name(&stem, format);
                    if counts.get(&name).copied().unwrap_or(0) > 1 {
                        self.file_name(&format!("{}_{}", stem, index), format)
                    } else {
                        name
                    }
                })
            })
            .collect()
    }

    fn name_parts(&self, member: &Member) -> (String, RasterFormat) {
        match &member.source {
            Some(path) => {
                let stem = path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| format!("data{}", member.index));
                let format = RasterFormat::from_path(path).unwrap_or(self.config.output_format);
                (stem, format)
            }
            None => {
                let stem = member
                    .grid
                    .name
                    .clone()
                    .filter(|n| !n.is_empty())
                    .unwrap_or_else(|| format!("data{}", member.index));
                (stem, self.config.output_format)
            }
        }
    }

    fn file_name(&self, stem: &str, format: RasterFormat) -> String {
        format!("{}{}.{}", stem, self.config.suffix, format.extension())
    }
}

/// Align `inputs` onto a shared grid and write them under `output_dir`
pub fn align(
    inputs: Vec<AlignInput>,
    output_dir: &Path,
    config: &AlignmentConfig,
    io: &dyn GridIo,
) -> WarpResult<AlignmentReport> {
    Alignment::new(config.clone()).apply(inputs, output_dir, io)
}

fn load_all(inputs: Vec<AlignInput>, io: &dyn GridIo) -> Vec<WarpResult<Member>> {
    let load = |(index, input): (usize, AlignInput)| -> WarpResult<Member> {
        match input {
            AlignInput::Grid(grid) => Ok(Member {
                index,
                source: None,
                grid,
            }),
            AlignInput::Path(path) => {
                let grid = io.load(&path).map_err(|e| {
                    log::warn!("Failed to load {}: {}", path.display(), e);
                    e
                })?;
                Ok(Member {
                    index,
                    source: Some(path),
                    grid,
                })
            }
        }
    };

    #[cfg(feature = "parallel")]
    let loaded = inputs.into_par_iter().enumerate().map(load).collect();
    #[cfg(not(feature = "parallel"))]
    let loaded = inputs.into_iter().enumerate().map(load).collect();

    loaded
}

/// Carry a pixel size over `bounds` from `source` into `target` units,
/// keeping the number of pixels across the reprojected bounds
fn resolution_in_crs(
    res: Resolution,
    bounds: &BoundingBox,
    source: &CoordinateReference,
    target: &CoordinateReference,
) -> WarpResult<Resolution> {
    if bounds.width() <= 0.0 || bounds.height() <= 0.0 {
        return Err(WarpError::DegenerateGrid(format!(
            "cannot carry resolution over empty bounds {:?}",
            bounds.as_tuple()
        )));
    }
    let projected = reproject_bounds(bounds, source, target, DEFAULT_DENSIFY_POINTS)?;
    Ok(Resolution::new(
        res.x * projected.width() / bounds.width(),
        res.y * projected.height() / bounds.height(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{generate_test_grid, TestGrid};

    #[test]
    fn test_default_config() {
        let config = AlignmentConfig::default();
        assert_eq!(config.suffix, "_aligned");
        assert_eq!(config.resolution, ResolutionPolicy::FirstGrid);
        assert_eq!(config.output_format, RasterFormat::NetCdf);
    }

    #[test]
    fn test_target_covers_common_bounds() {
        let a = generate_test_grid(&TestGrid::default().extent(-10.0, 50.0, 0.0, 60.0)).unwrap();
        let b = generate_test_grid(&TestGrid::default().extent(-12.0, 40.0, -2.0, 52.0)).unwrap();

        let target = Alignment::new(AlignmentConfig::default())
            .resolve_target(&[a, b])
            .unwrap();
        let bounds = target.bounds();
        approx::assert_abs_diff_eq!(bounds.left, -12.0, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(bounds.bottom, 40.0, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(bounds.right, 0.0, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(bounds.top, 60.0, epsilon = 1e-9);
    }

    #[test]
    fn test_common_resolution_is_carried_into_target_crs() {
        let a = generate_test_grid(&TestGrid::default().extent(-10.0, 50.0, 0.0, 60.0)).unwrap();
        let b = generate_test_grid(&TestGrid::default().extent(-12.0, 40.0, -2.0, 52.0)).unwrap();

        let config = AlignmentConfig {
            crs: Some(CrsDefinition::from(
                "+proj=sinu +lon_0=0 +x_0=0 +y_0=0 +ellps=WGS84 +datum=WGS84 +units=m +no_defs",
            )),
            resolution: ResolutionPolicy::Common(ResolutionMode::Mean),
            ..AlignmentConfig::default()
        };
        let target = Alignment::new(config).resolve_target(&[a, b]).unwrap();

        // Degree-sized pixels become tens of kilometres, not metres
        assert!(!target.crs.is_geographic());
        assert!((8..=20).contains(&target.width), "width {}", target.width);
        assert!((30..=50).contains(&target.height), "height {}", target.height);
        assert!(target.resolution().x > 10_000.0);
    }

    #[test]
    fn test_output_names() {
        let alignment = Alignment::new(AlignmentConfig::default());
        let grid = generate_test_grid(&TestGrid::default()).unwrap();

        let unnamed = Member { index: 3, source: None, grid: RasterGrid { name: None, ..grid.clone() } };
        assert_eq!(alignment.output_name(&unnamed), "data3_aligned.nc");

        let named = Member { index: 0, source: None, grid: grid.clone().with_name("scene") };
        assert_eq!(alignment.output_name(&named), "scene_aligned.nc");

        let from_file = Member { index: 1, source: Some(PathBuf::from("/in/slc.tif")), grid };
        assert_eq!(alignment.output_name(&from_file), "slc_aligned.tif");
    }

    #[test]
    fn test_colliding_output_names_are_disambiguated() {
        let alignment = Alignment::new(AlignmentConfig::default());
        let grid = generate_test_grid(&TestGrid::default()).unwrap().with_name("scene");

        let loaded = vec![
            Ok(Member { index: 0, source: None, grid: grid.clone() }),
            Ok(Member { index: 1, source: Some(PathBuf::from("/a/slc.tif")), grid: grid.clone() }),
            Err(WarpError::InvalidGrid("unreadable".to_string())),
            Ok(Member { index: 3, source: None, grid: grid.clone() }),
            Ok(Member { index: 4, source: Some(PathBuf::from("/b/slc.tif")), grid: grid.clone() }),
            Ok(Member { index: 5, source: Some(PathBuf::from("/b/slc.nc")), grid }),
        ];
        let names = alignment.output_names(&loaded);
        assert_eq!(
            names,
            vec![
                Some("scene_0_aligned.nc".to_string()),
                Some("slc_1_aligned.tif".to_string()),
                None,
                Some("scene_3_aligned.nc".to_string()),
                Some("slc_4_aligned.tif".to_string()),
                Some("slc_aligned.nc".to_string()),
            ]
        );
    }

    #[test]
    fn test_empty_batch() {
        let alignment = Alignment::new(AlignmentConfig::default());
        assert!(matches!(alignment.resolve_target(&[]), Err(WarpError::EmptyCollection(_))));
    }
}
