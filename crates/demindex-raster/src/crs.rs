//! Source coordinate reference systems and reprojection to WGS84.
//!
//! The raster's CRS is identified by its EPSG code, taken from the GeoKey
//! directory or, failing that, from the UTM zone in a USGS tile name. The
//! actual transformation, datum shift included, is delegated to GDAL/PROJ.

use crate::{RasterError, Result};
use gdal::spatial_ref::{AxisMappingStrategy, CoordTransform, SpatialRef};
use geo::Coord;
use std::fmt;

/// GeoKey ids used to identify the raster's coordinate system.
pub(crate) const GT_MODEL_TYPE_KEY: u16 = 1024;
pub(crate) const GT_RASTER_TYPE_KEY: u16 = 1025;
pub(crate) const GEOGRAPHIC_TYPE_KEY: u16 = 2048;
pub(crate) const PROJECTED_CS_TYPE_KEY: u16 = 3072;
pub(crate) const PROJECTION_KEY: u16 = 3074;

/// GTModelTypeGeoKey values.
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;

/// GeoKey value for a user-defined system.
const USER_DEFINED: u16 = 32767;

const EPSG_WGS84: u16 = 4326;
const EPSG_NAD83: u16 = 4269;

/// Coordinate reference system of a source raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceCrs {
    /// Longitude/latitude in degrees on the given EPSG datum.
    Geographic {
        /// EPSG code of the geographic CRS.
        epsg: u16,
    },
    /// Projected CRS in map units.
    Projected {
        /// EPSG code of the projected CRS.
        epsg: u16,
    },
    /// The GeoKeys did not name a system we can look up.
    Unknown {
        /// ProjectedCSTypeGeoKey or GeographicTypeGeoKey value, 0 if absent.
        code: u16,
    },
}

impl fmt::Display for SourceCrs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceCrs::Geographic { epsg } | SourceCrs::Projected { epsg } => write!(f, "EPSG:{}", epsg),
            SourceCrs::Unknown { code } => write!(f, "unknown (code {})", code),
        }
    }
}

impl SourceCrs {
    /// WGS84 longitude/latitude.
    pub const WGS84: SourceCrs = SourceCrs::Geographic { epsg: EPSG_WGS84 };

    /// Decode the CRS from `(key id, value)` pairs of a GeoKeyDirectory.
    pub fn from_geokeys(keys: &[(u16, u16)]) -> Self {
        let get = |id: u16| keys.iter().find(|(k, _)| *k == id).map(|(_, v)| *v);
        let datum = get(GEOGRAPHIC_TYPE_KEY).filter(|&code| code != 0 && code != USER_DEFINED);

        match get(PROJECTED_CS_TYPE_KEY) {
            Some(code) if code != 0 && code != USER_DEFINED => return SourceCrs::Projected { epsg: code },
            _ => {}
        }
        // User-defined projected systems still name the projection itself
        if let Some(code) = get(PROJECTION_KEY) {
            if let Some(crs) = Self::from_utm_projection_code(code, datum) {
                return crs;
            }
        }

        match (get(GT_MODEL_TYPE_KEY), datum) {
            (Some(MODEL_TYPE_PROJECTED), _) => SourceCrs::Unknown {
                code: get(PROJECTED_CS_TYPE_KEY).unwrap_or(0),
            },
            (Some(MODEL_TYPE_GEOGRAPHIC), None) => SourceCrs::WGS84,
            (_, Some(epsg)) => SourceCrs::Geographic { epsg },
            (_, None) => SourceCrs::Unknown { code: 0 },
        }
    }

    /// Map a ProjectionGeoKey (EPSG UTM coordinate operation) code to a
    /// projected CRS on the raster's datum.
    fn from_utm_projection_code(code: u16, datum: Option<u16>) -> Option<Self> {
        let (zone, north) = match code {
            16001..=16060 => (code - 16000, true),
            16101..=16160 => (code - 16100, false),
            _ => return None,
        };
        Some(Self::utm(zone as u8, north, datum == Some(EPSG_NAD83)))
    }

    /// UTM zone on NAD83 where EPSG defines it, WGS84 otherwise.
    fn utm(zone: u8, north: bool, nad83: bool) -> Self {
        let zone = zone as u16;
        let epsg = match (north, nad83) {
            (true, true) if zone <= 23 => 26900 + zone,
            (true, _) => 32600 + zone,
            (false, _) => 32700 + zone,
        };
        SourceCrs::Projected { epsg }
    }

    /// Infer the CRS from a USGS 1 meter tile name like
    /// `USGS_1M_15_x62y431_MO_WestCentral_2018_D19.tif`.
    ///
    /// These tiles are delivered in NAD83 / UTM.
    pub fn from_usgs_filename(name: &str) -> Option<Self> {
        let mut parts = name.split('_');
        if parts.next()? != "USGS" {
            return None;
        }
        if !parts.next()?.eq_ignore_ascii_case("1m") {
            return None;
        }
        let zone: u8 = parts.next()?.parse().ok()?;
        if (1..=60).contains(&zone) {
            Some(Self::utm(zone, true, true))
        } else {
            None
        }
    }

    /// Whether coordinates in this CRS are already longitude/latitude.
    pub fn is_geographic(&self) -> bool {
        matches!(self, SourceCrs::Geographic { .. })
    }

    /// GDAL spatial reference with x = easting/longitude, y = northing/latitude.
    pub fn spatial_ref(&self) -> Result<SpatialRef> {
        let epsg = match *self {
            SourceCrs::Geographic { epsg } | SourceCrs::Projected { epsg } => epsg,
            SourceCrs::Unknown { code } => {
                return Err(RasterError::UnsupportedCrs(format!("EPSG code {}", code)));
            }
        };
        let mut srs = SpatialRef::from_epsg(epsg as u32)
            .map_err(|e| RasterError::UnsupportedCrs(format!("EPSG:{}: {}", epsg, e)))?;
        srs.set_axis_mapping_strategy(AxisMappingStrategy::TraditionalGisOrder);
        Ok(srs)
    }
}

/// A coordinate transformation from a raster CRS to WGS84 lon/lat.
pub struct Reprojection {
    transform: Option<CoordTransform>,
}

impl fmt::Debug for Reprojection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reprojection")
            .field("identity", &self.transform.is_none())
            .finish()
    }
}

impl Reprojection {
    /// Build the transformation from `source` to WGS84.
    pub fn to_wgs84(source: SourceCrs) -> Result<Self> {
        if source == SourceCrs::WGS84 {
            return Ok(Self { transform: None });
        }
        let src = source.spatial_ref()?;
        let dst = SourceCrs::WGS84.spatial_ref()?;
        let transform = CoordTransform::new(&src, &dst)?;
        Ok(Self {
            transform: Some(transform),
        })
    }

    /// Transform `coords` in place.
    pub fn apply(&self, coords: &mut [Coord<f64>]) -> Result<()> {
        let transform = match &self.transform {
            Some(t) => t,
            None => return Ok(()),
        };
        let mut xs: Vec<f64> = coords.iter().map(|c| c.x).collect();
        let mut ys: Vec<f64> = coords.iter().map(|c| c.y).collect();
        let mut zs = vec![0.0_f64; coords.len()];
        transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
        for (c, (x, y)) in coords.iter_mut().zip(xs.into_iter().zip(ys)) {
            *c = Coord { x, y };
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn project(crs: SourceCrs, x: f64, y: f64) -> (f64, f64) {
        let mut coords = [Coord { x, y }];
        Reprojection::to_wgs84(crs).unwrap().apply(&mut coords).unwrap();
        (coords[0].x, coords[0].y)
    }

    #[test]
    fn test_utm_origin_of_zone() {
        // Equator on the central meridian of zone 31 (3°E)
        let (lon, lat) = project(SourceCrs::Projected { epsg: 32631 }, 500_000.0, 0.0);
        assert_abs_diff_eq!(lon, 3.0, epsilon = 1e-7);
        assert_abs_diff_eq!(lat, 0.0, epsilon = 1e-7);
    }

    #[test]
    fn test_utm_central_meridian_45n() {
        // Meridian arc to 45°N is 4 984 944.378 m, scaled by k0
        let (lon, lat) = project(SourceCrs::Projected { epsg: 32615 }, 500_000.0, 4_984_944.378 * 0.9996);
        assert_abs_diff_eq!(lon, -93.0, epsilon = 1e-7);
        assert_abs_diff_eq!(lat, 45.0, epsilon = 1e-5);
    }

    #[test]
    fn test_utm_south_hemisphere() {
        let (lon, lat) = project(SourceCrs::Projected { epsg: 32756 }, 500_000.0, 10_000_000.0);
        assert_abs_diff_eq!(lon, 153.0, epsilon = 1e-7);
        assert_abs_diff_eq!(lat, 0.0, epsilon = 1e-7);
    }

    #[test]
    fn test_nad83_utm_lands_near_wgs84() {
        // NAD83 and WGS84 differ by about a meter in the conterminous US
        let (lon, lat) = project(SourceCrs::Projected { epsg: 26915 }, 600_000.0, 4_300_000.0);
        assert!(lon > -92.0 && lon < -91.8, "lon {}", lon);
        assert!(lat > 38.8 && lat < 38.9, "lat {}", lat);
    }

    #[test]
    fn test_albers_is_supported() {
        // CONUS Albers (NAD83) origin is 23°N 96°W
        let (lon, lat) = project(SourceCrs::Projected { epsg: 5070 }, 0.0, 0.0);
        assert_abs_diff_eq!(lon, -96.0, epsilon = 1e-3);
        assert_abs_diff_eq!(lat, 23.0, epsilon = 1e-3);
    }

    #[test]
    fn test_wgs84_is_identity() {
        assert_eq!(project(SourceCrs::WGS84, -93.25, 38.5), (-93.25, 38.5));
    }

    #[test]
    fn test_from_geokeys() {
        // Projected, NAD83 / UTM 16N
        let keys = [(GT_MODEL_TYPE_KEY, 1), (GT_RASTER_TYPE_KEY, 1), (PROJECTED_CS_TYPE_KEY, 26916)];
        assert_eq!(SourceCrs::from_geokeys(&keys), SourceCrs::Projected { epsg: 26916 });

        // User-defined projected system that names UTM 15N as its projection
        let keys = [(GT_MODEL_TYPE_KEY, 1), (GEOGRAPHIC_TYPE_KEY, 4269), (PROJECTED_CS_TYPE_KEY, 32767), (PROJECTION_KEY, 16015)];
        assert_eq!(SourceCrs::from_geokeys(&keys), SourceCrs::Projected { epsg: 26915 });

        let keys = [(GT_MODEL_TYPE_KEY, 2), (GEOGRAPHIC_TYPE_KEY, 4269)];
        assert_eq!(SourceCrs::from_geokeys(&keys), SourceCrs::Geographic { epsg: 4269 });

        let keys = [(GT_MODEL_TYPE_KEY, 1), (PROJECTED_CS_TYPE_KEY, 32767)];
        assert_eq!(SourceCrs::from_geokeys(&keys), SourceCrs::Unknown { code: 32767 });

        assert_eq!(SourceCrs::from_geokeys(&[]), SourceCrs::Unknown { code: 0 });
    }

    #[test]
    fn test_from_usgs_filename() {
        assert_eq!(
            SourceCrs::from_usgs_filename("USGS_1M_15_x62y431_MO_WestCentral_2018_D19.tif"),
            Some(SourceCrs::Projected { epsg: 26915 })
        );
        assert_eq!(SourceCrs::from_usgs_filename("USGS_13_n48w123_20240327.tif"), None);
        assert_eq!(SourceCrs::from_usgs_filename("random.tif"), None);
    }

    #[test]
    fn test_unknown_crs_is_an_error() {
        assert!(matches!(
            Reprojection::to_wgs84(SourceCrs::Unknown { code: 32767 }),
            Err(RasterError::UnsupportedCrs(_))
        ));
    }
}
