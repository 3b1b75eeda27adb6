//! Coordinate reference normalization and point/bounds reprojection.
//!
//! Every accepted representation (PROJ string, key/value mapping, WKT, EPSG
//! code, or an already parsed reference) goes through GDAL's spatial
//! reference parser and is stored canonically as WKT, so references compare
//! equal whenever they describe the same projection.

use gdal::spatial_ref::{CoordTransform, SpatialRef};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::types::{BoundingBox, WarpError, WarpResult};

/// Points sampled along each edge when reprojecting a rectangle
pub const DEFAULT_DENSIFY_POINTS: usize = 21;

/// Any representation of a coordinate reference accepted at the boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CrsDefinition {
    /// PROJ string, WKT, or a user-input string such as `EPSG:4326`
    Text(String),
    /// PROJ parameters as key/value pairs, e.g. `{"proj": "longlat", "no_defs": "true"}`
    Mapping(BTreeMap<String, String>),
    /// EPSG authority code
    Code(u32),
    /// Already normalized reference
    Reference(CoordinateReference),
}

impl From<&str> for CrsDefinition {
    fn from(s: &str) -> Self {
        CrsDefinition::Text(s.to_string())
    }
}

impl From<String> for CrsDefinition {
    fn from(s: String) -> Self {
        CrsDefinition::Text(s)
    }
}

impl From<u32> for CrsDefinition {
    fn from(code: u32) -> Self {
        CrsDefinition::Code(code)
    }
}

impl From<BTreeMap<String, String>> for CrsDefinition {
    fn from(map: BTreeMap<String, String>) -> Self {
        CrsDefinition::Mapping(map)
    }
}

impl From<HashMap<String, String>> for CrsDefinition {
    fn from(map: HashMap<String, String>) -> Self {
        CrsDefinition::Mapping(map.into_iter().collect())
    }
}

impl From<CoordinateReference> for CrsDefinition {
    fn from(crs: CoordinateReference) -> Self {
        CrsDefinition::Reference(crs)
    }
}

impl From<&CoordinateReference> for CrsDefinition {
    fn from(crs: &CoordinateReference) -> Self {
        CrsDefinition::Reference(crs.clone())
    }
}

impl fmt::Display for CrsDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CrsDefinition::Text(s) => write!(f, "{}", s),
            CrsDefinition::Mapping(m) => write!(f, "{:?}", m),
            CrsDefinition::Code(code) => write!(f, "EPSG:{}", code),
            CrsDefinition::Reference(crs) => write!(f, "{}", crs),
        }
    }
}

/// Output representation requested from [`CoordinateReference::format`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CrsFormat {
    Proj,
    Mapping,
    Wkt,
}

/// A coordinate reference rendered in one of the [`CrsFormat`]s
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrsRepresentation {
    Proj(String),
    Mapping(BTreeMap<String, String>),
    Wkt(String),
}

/// Canonical handle for a map projection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinateReference {
    wkt: String,
    proj4: Option<String>,
    epsg: Option<u32>,
    geographic: bool,
}

impl CoordinateReference {
    /// Parse any supported representation
    pub fn parse(definition: impl Into<CrsDefinition>) -> WarpResult<Self> {
        let definition = definition.into();
        let srs = match &definition {
            CrsDefinition::Reference(crs) => return Ok(crs.clone()),
            CrsDefinition::Code(code) => SpatialRef::from_epsg(*code),
            CrsDefinition::Text(text) => {
                let text = text.trim();
                if text.is_empty() {
                    return Err(WarpError::InvalidReference(
                        "empty coordinate reference string".to_string(),
                    ));
                }
                SpatialRef::from_definition(text)
            }
            CrsDefinition::Mapping(map) => {
                let proj4 = mapping_to_proj4(map);
                if proj4.is_empty() {
                    return Err(WarpError::InvalidReference(
                        "empty coordinate reference mapping".to_string(),
                    ));
                }
                SpatialRef::from_proj4(&proj4)
            }
        };

        let srs = srs.map_err(|e| {
            log::debug!("Failed to parse coordinate reference {}: {}", definition, e);
            WarpError::InvalidReference(format!("cannot interpret '{}': {}", definition, e))
        })?;

        Self::from_spatial_ref(&srs)
    }

    pub fn from_epsg(code: u32) -> WarpResult<Self> {
        Self::parse(code)
    }

    /// WGS84 longitude/latitude, the frame of every [`crate::types::Extent`]
    pub fn wgs84() -> WarpResult<Self> {
        Self::from_epsg(4326)
    }

    pub(crate) fn from_spatial_ref(srs: &SpatialRef) -> WarpResult<Self> {
        let wkt = srs.to_wkt()?;
        let proj4 = srs.to_proj4().ok().map(|p| p.trim().to_string()).filter(|p| !p.is_empty());

        let mut identified = srs.clone();
        let _ = identified.auto_identify_epsg();
        let epsg = match identified.auth_name() {
            Ok(name) if name.eq_ignore_ascii_case("EPSG") => identified
                .auth_code()
                .ok()
                .and_then(|code| u32::try_from(code).ok()),
            _ => None,
        };

        Ok(Self {
            wkt,
            proj4,
            epsg,
            geographic: srs.is_geographic(),
        })
    }

    /// GDAL spatial reference with x = easting/longitude, y = northing/latitude
    pub fn spatial_ref(&self) -> WarpResult<SpatialRef> {
        let mut srs = SpatialRef::from_wkt(&self.wkt)?;
        srs.set_axis_mapping_strategy(
            gdal_sys::OSRAxisMappingStrategy::OAMS_TRADITIONAL_GIS_ORDER,
        );
        Ok(srs)
    }

    pub fn to_wkt(&self) -> &str {
        &self.wkt
    }

    /// PROJ string, when the projection can be expressed as one
    pub fn to_proj4(&self) -> Option<&str> {
        self.proj4.as_deref()
    }

    /// PROJ parameters as key/value pairs; flags map to `"true"`
    pub fn to_mapping(&self) -> BTreeMap<String, String> {
        match &self.proj4 {
            Some(proj4) => proj4_to_mapping(proj4),
            None => BTreeMap::new(),
        }
    }

    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    pub fn is_geographic(&self) -> bool {
        self.geographic
    }

    pub fn format(&self, format: CrsFormat) -> WarpResult<CrsRepresentation> {
        match format {
            CrsFormat::Wkt => Ok(CrsRepresentation::Wkt(self.wkt.clone())),
            CrsFormat::Proj => self
                .proj4
                .clone()
                .map(CrsRepresentation::Proj)
                .ok_or_else(|| {
                    WarpError::InvalidReference(format!("{} has no PROJ string form", self))
                }),
            CrsFormat::Mapping => Ok(CrsRepresentation::Mapping(self.to_mapping())),
        }
    }
}

impl PartialEq for CoordinateReference {
    fn eq(&self, other: &Self) -> bool {
        if self.wkt == other.wkt {
            return true;
        }
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }
        if let (Some(a), Some(b)) = (&self.proj4, &other.proj4) {
            if a == b {
                return true;
            }
        }
        match (self.spatial_ref(), other.spatial_ref()) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for CoordinateReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.epsg, &self.proj4) {
            (Some(code), _) => write!(f, "EPSG:{}", code),
            (None, Some(proj4)) => write!(f, "{}", proj4),
            (None, None) => write!(f, "{}", self.wkt),
        }
    }
}

/// Parse a coordinate reference from any supported representation
pub fn parse_crs(definition: impl Into<CrsDefinition>) -> WarpResult<CoordinateReference> {
    CoordinateReference::parse(definition)
}

/// True when both references describe the same projection
pub fn crs_equals(a: &CoordinateReference, b: &CoordinateReference) -> bool {
    a == b
}

fn mapping_to_proj4(map: &BTreeMap<String, String>) -> String {
    let mut parts = Vec::with_capacity(map.len());
    for (key, value) in map {
        let key = key.trim().trim_start_matches('+');
        if key.is_empty() {
            continue;
        }
        match value.trim() {
            "" | "true" | "True" => parts.push(format!("+{}", key)),
            "false" | "False" => {}
            v => parts.push(format!("+{}={}", key, v)),
        }
    }
    parts.join(" ")
}

fn proj4_to_mapping(proj4: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    let re = match Regex::new(r"\+([A-Za-z0-9_]+)(?:=(\S+))?") {
        Ok(re) => re,
        Err(_) => return map,
    };
    for captures in re.captures_iter(proj4) {
        let key = captures[1].to_string();
        let value = captures
            .get(2)
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "true".to_string());
        map.insert(key, value);
    }
    map
}

/// Transforms points between two coordinate references.
///
/// Equal references short-circuit to the identity. Points the underlying
/// projection cannot handle come back as NaN instead of failing the batch.
pub struct PointTransformer {
    inner: Option<CoordTransform>,
}

impl PointTransformer {
    pub fn new(source: &CoordinateReference, target: &CoordinateReference) -> WarpResult<Self> {
        if source == target {
            return Ok(Self { inner: None });
        }
        let src = source.spatial_ref()?;
        let dst = target.spatial_ref()?;
        Ok(Self {
            inner: Some(CoordTransform::new(&src, &dst)?),
        })
    }

    pub fn is_identity(&self) -> bool {
        self.inner.is_none()
    }

    /// Transform coordinates in place
    pub fn transform(&self, xs: &mut [f64], ys: &mut [f64]) {
        let transform = match &self.inner {
            Some(t) => t,
            None => return,
        };

        let original_x = xs.to_vec();
        let original_y = ys.to_vec();
        let mut zs = vec![0.0; xs.len()];

        if transform.transform_coords(xs, ys, &mut zs).is_err() {
            log::debug!("Batch transform of {} points failed, retrying point by point", xs.len());
            for i in 0..xs.len() {
                let mut x = [original_x[i]];
                let mut y = [original_y[i]];
                let mut z = [0.0];
                if transform.transform_coords(&mut x, &mut y, &mut z).is_ok() {
                    xs[i] = x[0];
                    ys[i] = y[0];
                } else {
                    xs[i] = f64::NAN;
                    ys[i] = f64::NAN;
                }
            }
        }

        for (x, y) in xs.iter_mut().zip(ys.iter_mut()) {
            if !x.is_finite() || !y.is_finite() {
                *x = f64::NAN;
                *y = f64::NAN;
            }
        }
    }
}

/// Reproject a rectangle by transforming `densify` points along each edge and
/// taking the envelope of the results
pub fn reproject_bounds(
    bounds: &BoundingBox,
    source: &CoordinateReference,
    target: &CoordinateReference,
    densify: usize,
) -> WarpResult<BoundingBox> {
    let transformer = PointTransformer::new(source, target)?;
    if transformer.is_identity() {
        return Ok(*bounds);
    }

    let steps = densify.max(2) - 1;
    let mut xs = Vec::with_capacity(4 * (steps + 1));
    let mut ys = Vec::with_capacity(4 * (steps + 1));
    for i in 0..=steps {
        let t = i as f64 / steps as f64;
        let x = bounds.left + t * bounds.width();
        let y = bounds.bottom + t * bounds.height();
        xs.extend_from_slice(&[x, x, bounds.left, bounds.right]);
        ys.extend_from_slice(&[bounds.bottom, bounds.top, y, y]);
    }

    transformer.transform(&mut xs, &mut ys);

    BoundingBox::envelope(xs.into_iter().zip(ys)).ok_or_else(|| {
        WarpError::InvalidTransform(format!(
            "bounds {:?} cannot be expressed in {}",
            bounds.as_tuple(),
            target
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const SINUSOIDAL: &str = "+proj=sinu +lon_0=0 +x_0=0 +y_0=0 +ellps=WGS84 +datum=WGS84 +units=m +no_defs";

    #[test]
    fn test_mapping_to_proj4() {
        let mut map = BTreeMap::new();
        map.insert("proj".to_string(), "longlat".to_string());
        map.insert("datum".to_string(), "WGS84".to_string());
        map.insert("no_defs".to_string(), "true".to_string());
        map.insert("over".to_string(), "false".to_string());
        assert_eq!(mapping_to_proj4(&map), "+datum=WGS84 +no_defs +proj=longlat");
    }

    #[test]
    fn test_proj4_to_mapping() {
        let map = proj4_to_mapping("+proj=sinu +lon_0=0 +units=m +no_defs");
        assert_eq!(map.get("proj").map(String::as_str), Some("sinu"));
        assert_eq!(map.get("lon_0").map(String::as_str), Some("0"));
        assert_eq!(map.get("no_defs").map(String::as_str), Some("true"));
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_parse_epsg_code() {
        let crs = CoordinateReference::from_epsg(4326).unwrap();
        assert_eq!(crs.epsg(), Some(4326));
        assert!(crs.is_geographic());
    }

    #[test]
    fn test_parse_invalid_definition() {
        assert!(matches!(
            CoordinateReference::parse("not_a_crs"),
            Err(WarpError::InvalidReference(_))
        ));
        assert!(matches!(
            CoordinateReference::parse("   "),
            Err(WarpError::InvalidReference(_))
        ));
        assert!(matches!(
            CoordinateReference::parse(BTreeMap::new()),
            Err(WarpError::InvalidReference(_))
        ));
    }

    #[test]
    fn test_projected_is_not_geographic() {
        let crs = CoordinateReference::parse(SINUSOIDAL).unwrap();
        assert!(!crs.is_geographic());
        assert_ne!(crs, CoordinateReference::wgs84().unwrap());
    }

    #[test]
    fn test_identity_transformer() {
        let wgs84 = CoordinateReference::wgs84().unwrap();
        let transformer = PointTransformer::new(&wgs84, &wgs84).unwrap();
        assert!(transformer.is_identity());

        let mut xs = [1.0, 2.0];
        let mut ys = [3.0, 4.0];
        transformer.transform(&mut xs, &mut ys);
        assert_eq!(xs, [1.0, 2.0]);
        assert_eq!(ys, [3.0, 4.0]);
    }

    #[test]
    fn test_transform_uses_lon_lat_order() {
        let wgs84 = CoordinateReference::wgs84().unwrap();
        let sinu = CoordinateReference::parse(SINUSOIDAL).unwrap();
        let transformer = PointTransformer::new(&wgs84, &sinu).unwrap();

        // On the sinusoidal projection y depends on latitude only
        let mut xs = [0.0, 10.0];
        let mut ys = [45.0, 45.0];
        transformer.transform(&mut xs, &mut ys);
        assert_abs_diff_eq!(xs[0], 0.0, epsilon = 1e-6);
        assert!(xs[1] > 0.0);
        assert_abs_diff_eq!(ys[0], ys[1], epsilon = 1e-6);
    }

    #[test]
    fn test_reproject_bounds_roundtrip_contains_original() {
        let wgs84 = CoordinateReference::wgs84().unwrap();
        let sinu = CoordinateReference::parse(SINUSOIDAL).unwrap();
        let bounds = BoundingBox::new(-10.0, 50.0, 0.0, 60.0);

        let projected = reproject_bounds(&bounds, &wgs84, &sinu, DEFAULT_DENSIFY_POINTS).unwrap();
        assert!(projected.left < 0.0 && projected.right <= 1e-6);

        let back = reproject_bounds(&projected, &sinu, &wgs84, DEFAULT_DENSIFY_POINTS).unwrap();
        assert!(back.left <= bounds.left + 1e-9);
        assert!(back.right >= bounds.right - 1e-9);
        assert_abs_diff_eq!(back.bottom, bounds.bottom, epsilon = 1e-6);
        assert_abs_diff_eq!(back.top, bounds.top, epsilon = 1e-6);
    }
}
