//! Loading and saving grids.

pub mod gdal_io;

pub use gdal_io::GdalGridIo;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

use crate::types::{RasterGrid, WarpError, WarpResult};

/// Storage backend for grids.
///
/// Implementations must round-trip coordinate arrays, CRS and transform
/// metadata exactly.
pub trait GridIo: Send + Sync {
    fn load(&self, path: &Path) -> WarpResult<RasterGrid>;

    fn save(&self, grid: &RasterGrid, path: &Path) -> WarpResult<()>;
}

/// Container formats understood by [`GdalGridIo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RasterFormat {
    /// Self-describing container
    #[default]
    NetCdf,
    GeoTiff,
}

impl RasterFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> WarpResult<Self> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .unwrap_or_default();

        match ext.as_str() {
            "nc" | "nc4" | "netcdf" => Ok(RasterFormat::NetCdf),
            "tif" | "tiff" | "gtiff" => Ok(RasterFormat::GeoTiff),
            _ => Err(WarpError::InvalidFormat(format!(
                "cannot infer a raster format from '{}'",
                path.display()
            ))),
        }
    }

    pub fn driver_name(&self) -> &'static str {
        match self {
            RasterFormat::NetCdf => "netCDF",
            RasterFormat::GeoTiff => "GTiff",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            RasterFormat::NetCdf => "nc",
            RasterFormat::GeoTiff => "tif",
        }
    }
}

impl fmt::Display for RasterFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.driver_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(RasterFormat::from_path(Path::new("a/b.nc")).unwrap(), RasterFormat::NetCdf);
        assert_eq!(RasterFormat::from_path(Path::new("scene.TIF")).unwrap(), RasterFormat::GeoTiff);
        assert!(matches!(
            RasterFormat::from_path(Path::new("scene.jpg")),
            Err(WarpError::InvalidFormat(_))
        ));
        assert!(RasterFormat::from_path(Path::new("no_extension")).is_err());
    }
}
