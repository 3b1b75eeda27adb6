use approx::assert_abs_diff_eq;
use gridwarp::core::align::{align, AlignInput, Alignment, AlignmentConfig, ResolutionPolicy};
use gridwarp::core::common::{common_bounds, ResolutionMode};
use gridwarp::core::crs::CrsDefinition;
use gridwarp::core::geometry::{bounds_of, crs_of};
use gridwarp::core::reproject::{reproject, ReprojectionParams};
use gridwarp::io::{GdalGridIo, GridIo, RasterFormat};
use gridwarp::testing::{generate_test_grid, TestGrid};
use gridwarp::{BoundingBox, RasterGrid, Resolution, WarpError};
use tempfile::TempDir;

const SINUSOIDAL: &str = "+proj=sinu +lon_0=0 +x_0=0 +y_0=0 +ellps=WGS84 +datum=WGS84 +units=m +no_defs";

const EXTENTS: [(f64, f64, f64, f64); 4] = [
    (-10.0, 50.0, 0.0, 60.0),
    (-12.0, 40.0, -2.0, 52.0),
    (-13.0, 50.0, -3.0, 60.0),
    (-9.0, 51.0, 1.0, 61.0),
];

fn init() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn grids() -> Vec<RasterGrid> {
    EXTENTS
        .iter()
        .map(|&(l, b, r, t)| generate_test_grid(&TestGrid::default().extent(l, b, r, t)).unwrap())
        .collect()
}

fn tiff_config() -> AlignmentConfig {
    AlignmentConfig {
        output_format: RasterFormat::GeoTiff,
        ..AlignmentConfig::default()
    }
}

fn assert_bounds_eq(a: &BoundingBox, b: &BoundingBox, epsilon: f64) {
    assert_abs_diff_eq!(a.left, b.left, epsilon = epsilon);
    assert_abs_diff_eq!(a.bottom, b.bottom, epsilon = epsilon);
    assert_abs_diff_eq!(a.right, b.right, epsilon = epsilon);
    assert_abs_diff_eq!(a.top, b.top, epsilon = epsilon);
}

#[test]
fn test_align_in_memory_grids() {
    init();

    let dir = TempDir::new().unwrap();
    let grids = grids();
    let expected = common_bounds(&grids, None).unwrap();

    let inputs: Vec<AlignInput> = grids.into_iter().map(AlignInput::from).collect();
    let report = align(inputs, dir.path(), &tiff_config(), &GdalGridIo).unwrap();
    assert!(report.is_complete());

    let aligned: Vec<_> = report.succeeded().collect();
    assert_eq!(aligned.len(), 4);

    for (i, item) in aligned.iter().enumerate() {
        assert_eq!(item.index, i);
        assert_eq!(item.path, dir.path().join(format!("data{}_aligned.tif", i)));
        assert!(item.path.exists());

        assert_eq!(item.grid.x, aligned[0].grid.x);
        assert_eq!(item.grid.y, aligned[0].grid.y);
        assert_bounds_eq(&bounds_of(&item.grid).unwrap(), &expected, 1e-9);
    }
}

#[test]
fn test_align_files() {
    init();

    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let io = GdalGridIo::new();

    let mut inputs = Vec::new();
    for (i, grid) in grids().iter().enumerate() {
        let path = input_dir.path().join(format!("scene_{}.tif", i));
        io.save(grid, &path).unwrap();
        inputs.push(AlignInput::from(path));
    }
    let expected = common_bounds(&grids(), None).unwrap();

    let report = Alignment::new(AlignmentConfig::default())
        .apply(inputs, output_dir.path(), &io)
        .unwrap();
    assert!(report.is_complete());

    let aligned = report.into_grids().unwrap();
    assert_eq!(aligned.len(), 4);
    for (i, grid) in aligned.iter().enumerate() {
        assert!(output_dir.path().join(format!("scene_{}_aligned.tif", i)).exists());
        assert_eq!(grid.x, aligned[0].x);
        assert_eq!(grid.y, aligned[0].y);
        assert_bounds_eq(&bounds_of(grid).unwrap(), &expected, 1e-6);
    }

    // Saved results load back onto the same grid
    let reloaded = io.load(&output_dir.path().join("scene_2_aligned.tif")).unwrap();
    assert_eq!(reloaded.ncols(), aligned[2].ncols());
    assert_eq!(reloaded.nrows(), aligned[2].nrows());
    assert_eq!(crs_of(&reloaded).unwrap(), crs_of(&aligned[2]).unwrap());
}

#[test]
fn test_align_netcdf_files_with_default_config() {
    init();
    if gdal::DriverManager::get_driver_by_name(RasterFormat::NetCdf.driver_name()).is_err() {
        log::warn!("GDAL was built without the netCDF driver, skipping");
        return;
    }

    let input_dir = TempDir::new().unwrap();
    let output_dir = TempDir::new().unwrap();
    let io = GdalGridIo::new();

    let mut inputs = Vec::new();
    for (i, grid) in grids().iter().enumerate() {
        let path = input_dir.path().join(format!("data_{}.nc", i));
        io.save(&grid.clone().with_name(&format!("data_{}", i)), &path).unwrap();
        inputs.push(AlignInput::from(path));
    }

    let report = align(inputs, output_dir.path(), &AlignmentConfig::default(), &io).unwrap();
    assert!(report.is_complete());

    let aligned = report.into_grids().unwrap();
    for (i, grid) in aligned.iter().enumerate() {
        let path = output_dir.path().join(format!("data_{}_aligned.nc", i));
        assert!(path.exists());

        let reloaded = io.load(&path).unwrap();
        assert_eq!(reloaded.name.as_deref(), Some(format!("data_{}", i).as_str()));
        assert_eq!(reloaded.ncols(), aligned[0].ncols());
        assert_eq!(reloaded.nrows(), aligned[0].nrows());
        assert_eq!(grid.x, aligned[0].x);
        assert_eq!(grid.y, aligned[0].y);
    }
}

#[test]
fn test_same_named_grids_do_not_overwrite_each_other() {
    init();

    let dir = TempDir::new().unwrap();
    let inputs: Vec<AlignInput> = grids()
        .into_iter()
        .take(2)
        .map(|grid| AlignInput::from(grid.with_name("scene")))
        .collect();

    let report = align(inputs, dir.path(), &tiff_config(), &GdalGridIo).unwrap();
    assert!(report.is_complete());

    let paths: Vec<_> = report.succeeded().map(|item| item.path.clone()).collect();
    assert_eq!(
        paths,
        vec![dir.path().join("scene_0_aligned.tif"), dir.path().join("scene_1_aligned.tif")]
    );
    for path in &paths {
        assert!(path.exists());
        assert_eq!(GdalGridIo.load(path).unwrap().name.as_deref(), Some("scene"));
    }
}

#[test]
fn test_failures_are_isolated_per_item() {
    init();

    let dir = TempDir::new().unwrap();
    let mut inputs: Vec<AlignInput> = grids().into_iter().take(2).map(AlignInput::from).collect();
    inputs.insert(1, AlignInput::from(dir.path().join("missing.tif")));

    let report = align(inputs, dir.path(), &tiff_config(), &GdalGridIo).unwrap();
    assert!(!report.is_complete());
    assert_eq!(report.items.len(), 3);
    assert!(report.items[0].is_ok());
    assert!(report.items[1].is_err());
    assert!(report.items[2].is_ok());

    let failed: Vec<usize> = report.failed().map(|(i, _)| i).collect();
    assert_eq!(failed, vec![1]);
    assert!(report.into_grids().is_err());
}

#[test]
fn test_align_mixed_projections_onto_reference_crs() {
    init();

    let dir = TempDir::new().unwrap();
    let mut grids = grids();
    grids[1] = reproject(&grids[1], &ReprojectionParams::new().to_crs(SINUSOIDAL)).unwrap();

    let config = AlignmentConfig {
        crs: Some(CrsDefinition::Code(4326)),
        resolution: ResolutionPolicy::Fixed(Resolution::new(0.5, 0.5)),
        ..tiff_config()
    };
    let report = align(grids.into_iter().map(AlignInput::from).collect(), dir.path(), &config, &GdalGridIo).unwrap();

    let target_bounds = report.target.bounds();
    let aligned = report.into_grids().unwrap();
    for grid in &aligned {
        assert!(crs_of(grid).unwrap().is_geographic());
        assert_eq!(grid.x, aligned[0].x);
        assert_eq!(grid.y, aligned[0].y);
        assert_bounds_eq(&bounds_of(grid).unwrap(), &target_bounds, 1e-9);
    }
    assert!(target_bounds.left <= -13.0 + 1e-9);
    assert!(target_bounds.top >= 61.0 - 1e-9);
}

#[test]
fn test_explicit_extent_is_used() {
    init();

    let dir = TempDir::new().unwrap();
    let extent = BoundingBox::new(-11.0, 45.0, -1.0, 55.0);
    let config = AlignmentConfig {
        extent: Some(extent),
        resolution: ResolutionPolicy::Common(ResolutionMode::Min),
        ..tiff_config()
    };

    let report = align(grids().into_iter().map(AlignInput::from).collect(), dir.path(), &config, &GdalGridIo).unwrap();
    for grid in report.into_grids().unwrap() {
        assert_bounds_eq(&bounds_of(&grid).unwrap(), &extent, 1e-9);
    }
}

#[test]
fn test_common_resolution_policy_needs_one_projection() {
    init();

    let dir = TempDir::new().unwrap();
    let mut grids = grids();
    grids[0] = reproject(&grids[0], &ReprojectionParams::new().to_crs(SINUSOIDAL)).unwrap();

    let config = AlignmentConfig {
        resolution: ResolutionPolicy::Common(ResolutionMode::Mean),
        ..tiff_config()
    };
    let result = align(grids.into_iter().map(AlignInput::from).collect(), dir.path(), &config, &GdalGridIo);
    assert!(matches!(result, Err(WarpError::ProjectionMismatch(_))));
}

#[test]
fn test_empty_batch_is_rejected() {
    init();

    let dir = TempDir::new().unwrap();
    let result = align(Vec::new(), dir.path(), &AlignmentConfig::default(), &GdalGridIo);
    assert!(matches!(result, Err(WarpError::EmptyCollection(_))));
}
