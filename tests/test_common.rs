use approx::assert_abs_diff_eq;
use gridwarp::core::common::{common_bounds, common_extent, common_resolution, ResolutionMode};
use gridwarp::core::crs::CoordinateReference;
use gridwarp::core::geometry::{extent_of, resolution_of};
use gridwarp::core::reproject::{reproject, ReprojectionParams};
use gridwarp::testing::{generate_test_grid, TestGrid};
use gridwarp::{RasterGrid, WarpError};

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

fn grids_with_extents() -> Vec<RasterGrid> {
    EXTENTS
        .iter()
        .map(|&(l, b, r, t)| generate_test_grid(&TestGrid::default().extent(l, b, r, t)).unwrap())
        .collect()
}

#[test]
fn test_common_bounds() {
    init();

    let bounds = common_bounds(&grids_with_extents(), None).unwrap();
    assert_abs_diff_eq!(bounds.left, -13.0, epsilon = 1e-9);
    assert_abs_diff_eq!(bounds.bottom, 40.0, epsilon = 1e-9);
    assert_abs_diff_eq!(bounds.right, 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(bounds.top, 61.0, epsilon = 1e-9);
}

#[test]
fn test_common_bounds_of_one_grid_is_its_bounds() {
    init();

    let grids = grids_with_extents();
    let bounds = common_bounds(&grids[..1], None).unwrap();
    assert_abs_diff_eq!(bounds.left, -10.0, epsilon = 1e-9);
    assert_abs_diff_eq!(bounds.top, 60.0, epsilon = 1e-9);
}

#[test]
fn test_common_bounds_requires_one_projection() {
    init();

    let mut grids = grids_with_extents();
    let projected = reproject(&grids[0], &ReprojectionParams::new().to_crs(SINUSOIDAL)).unwrap();
    grids.push(projected);

    match common_bounds(&grids, None) {
        Err(WarpError::ProjectionMismatch(msg)) => assert!(msg.contains("same projection")),
        other => panic!("expected ProjectionMismatch, got {:?}", other),
    }

    // With a reference CRS the projected grid is brought back into lon/lat
    let wgs84 = CoordinateReference::wgs84().unwrap();
    let bounds = common_bounds(&grids, Some(&wgs84)).unwrap();
    assert!(bounds.left <= -13.0 + 1e-9);
    assert!(bounds.right >= 1.0 - 1e-9);
    assert!(bounds.bottom <= 40.0 + 1e-9);
    assert!(bounds.top >= 61.0 - 1e-9);
}

#[test]
fn test_common_extent_across_projections() {
    init();

    let geographic = generate_test_grid(&TestGrid::default().extent(-10.0, 50.0, 0.0, 60.0)).unwrap();
    let projected = reproject(
        &generate_test_grid(&TestGrid::default().extent(5.0, 40.0, 15.0, 45.0)).unwrap(),
        &ReprojectionParams::new().to_crs(SINUSOIDAL),
    )
    .unwrap();

    let extent = common_extent(&[geographic.clone(), projected.clone()]).unwrap();
    let a = extent_of(&geographic).unwrap();
    let b = extent_of(&projected).unwrap();

    assert_eq!(extent, a.union(&b));
    assert_abs_diff_eq!(extent.left, -10.0, epsilon = 1e-6);
    assert_abs_diff_eq!(extent.top, 60.0, epsilon = 1e-6);
    assert_abs_diff_eq!(extent.bottom, 40.0, epsilon = 1e-6);
    assert!(extent.right >= 15.0 - 1e-6);
}

#[test]
fn test_common_resolution_modes() {
    init();

    let grids = vec![
        generate_test_grid(&TestGrid::default().shape(11, 21)).unwrap(),
        generate_test_grid(&TestGrid::default().shape(21, 11)).unwrap(),
        generate_test_grid(&TestGrid::default().shape(41, 6)).unwrap(),
    ];
    let resolutions: Vec<_> = grids.iter().map(|g| resolution_of(g).unwrap()).collect();
    let xs: Vec<f64> = resolutions.iter().map(|r| r.x).collect();
    let ys: Vec<f64> = resolutions.iter().map(|r| r.y).collect();

    let min = common_resolution(&grids, ResolutionMode::Min).unwrap();
    assert_abs_diff_eq!(min.x, xs.iter().cloned().fold(f64::INFINITY, f64::min), epsilon = 1e-12);
    assert_abs_diff_eq!(min.y, ys.iter().cloned().fold(f64::INFINITY, f64::min), epsilon = 1e-12);

    let max = common_resolution(&grids, ResolutionMode::Max).unwrap();
    assert_abs_diff_eq!(max.x, 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(max.y, 2.0, epsilon = 1e-12);

    let mean = common_resolution(&grids, "mean".parse().unwrap()).unwrap();
    assert_abs_diff_eq!(mean.x, xs.iter().sum::<f64>() / 3.0, epsilon = 1e-12);
    assert_abs_diff_eq!(mean.y, ys.iter().sum::<f64>() / 3.0, epsilon = 1e-12);
}

#[test]
fn test_unsupported_mode_names_the_value() {
    init();

    match "median".parse::<ResolutionMode>() {
        Err(WarpError::InvalidMode(msg)) => assert!(msg.contains("median")),
        other => panic!("expected InvalidMode, got {:?}", other),
    }
}

#[test]
fn test_common_resolution_requires_one_projection() {
    init();

    let geographic = generate_test_grid(&TestGrid::default()).unwrap();
    let projected = reproject(&geographic, &ReprojectionParams::new().to_crs(SINUSOIDAL)).unwrap();

    match common_resolution(&[geographic, projected], ResolutionMode::Mean) {
        Err(WarpError::ProjectionMismatch(msg)) => {
            assert_eq!(msg, "All grids must have the same projection.")
        }
        other => panic!("expected ProjectionMismatch, got {:?}", other),
    }
}
