//! Footprint extraction: raster file to WGS84 polygon.
//!
//! ## Pipeline
//!
//! 1. Decode the first band into a boolean valid/no-data mask.
//! 2. Polygonize the mask and keep the largest 4-connected valid component.
//!    Holes are dropped, the result is always a single outer part.
//! 3. Simplify the ring with Douglas-Peucker in pixel units.
//! 4. Map vertices through the geotransform and reproject to WGS84.
//!
//! Everything the conversion depends on is carried in [`FootprintConfig`];
//! there is no process-wide engine state.

use crate::crs::{Reprojection, SourceCrs};
use crate::geotiff::{GeoRaster, GeoTransform};
use crate::mask::ValidityMask;
use crate::{RasterError, Result};
use geo::{Coord, LineString, Polygon, Simplify};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// USGS DEM products write this as their no-data value.
pub const USGS_NODATA: f64 = -999_999.0;

/// Settings for the raster-to-polygon conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FootprintConfig {
    /// Douglas-Peucker tolerance in pixels. 0 disables simplification.
    pub simplify_tolerance_px: f64,
    /// Valid fractions below this are reported as a quality warning.
    pub min_valid_fraction: f64,
    /// Reproject to WGS84. When false, native CRS coordinates are returned as-is.
    pub reproject: bool,
    /// No-data value used when the file has no GDAL_NODATA tag.
    pub nodata_fallback: Option<f64>,
    /// Treat rasters with an unrecognized CRS as geographic instead of failing.
    pub assume_geographic: bool,
}

impl Default for FootprintConfig {
    fn default() -> Self {
        FootprintConfig {
            simplify_tolerance_px: 2.0,
            min_valid_fraction: 0.01,
            reproject: true,
            nodata_fallback: Some(USGS_NODATA),
            assume_geographic: false,
        }
    }
}

/// Data-quality issues found while extracting a footprint.
#[derive(Debug, Clone, PartialEq)]
pub enum QualityWarning {
    /// More than one valid component; only the largest was kept.
    DiscardedComponents {
        /// Number of components found.
        components: usize,
        /// Valid pixels outside the kept component.
        dropped_pixels: u64,
    },
    /// Very little of the raster is valid.
    LowValidFraction {
        /// Fraction of valid pixels.
        fraction: f64,
    },
    /// The CRS was not recognized and geographic coordinates were assumed.
    AssumedGeographic {
        /// The unrecognized CRS.
        crs: SourceCrs,
    },
    /// Coordinates were left in the native CRS.
    NotReprojected {
        /// The native CRS.
        crs: SourceCrs,
    },
}

impl fmt::Display for QualityWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QualityWarning::DiscardedComponents {
                components,
                dropped_pixels,
            } => write!(
                f,
                "{} valid components, {} pixels outside the largest were dropped",
                components, dropped_pixels
            ),
            QualityWarning::LowValidFraction { fraction } => {
                write!(f, "only {:.2}% of pixels are valid", fraction * 100.0)
            }
            QualityWarning::AssumedGeographic { crs } => {
                write!(f, "CRS {} not recognized, assumed geographic", crs)
            }
            QualityWarning::NotReprojected { crs } => {
                write!(f, "footprint left in native CRS {}", crs)
            }
        }
    }
}

/// Statistics describing how a footprint was derived.
#[derive(Debug, Clone, PartialEq)]
pub struct FootprintStats {
    /// Raster width and height in pixels.
    pub dimensions: (u32, u32),
    /// Fraction of all pixels that are valid.
    pub valid_fraction: f64,
    /// Number of 4-connected valid components.
    pub components: usize,
    /// Valid pixels outside the kept component.
    pub dropped_pixels: u64,
    /// Ring vertices before simplification.
    pub traced_vertices: usize,
    /// Ring vertices after simplification.
    pub simplified_vertices: usize,
    /// CRS the coordinates were converted from.
    pub source_crs: SourceCrs,
}

/// The valid-data extent of one raster tile.
#[derive(Debug, Clone)]
pub struct Footprint {
    /// Single-part polygon, WGS84 lon/lat unless reprojection was disabled.
    pub polygon: Polygon<f64>,
    /// How the polygon was derived.
    pub stats: FootprintStats,
    /// Data-quality issues worth surfacing to the operator.
    pub warnings: Vec<QualityWarning>,
}

/// Converts a downloaded raster into its footprint polygon.
///
/// Implementations must be shareable across worker threads.
pub trait FootprintExtractor: Send + Sync {
    /// Derive the footprint of the raster at `path`.
    fn extract(&self, path: &Path) -> Result<Footprint>;
}

/// Mask-and-polygonize footprint extractor for GeoTIFF tiles.
#[derive(Debug, Clone, Default)]
pub struct MaskFootprinter {
    config: FootprintConfig,
}

impl MaskFootprinter {
    /// Create an extractor with the given settings.
    pub fn new(config: FootprintConfig) -> Self {
        Self { config }
    }
}

impl FootprintExtractor for MaskFootprinter {
    fn extract(&self, path: &Path) -> Result<Footprint> {
        let mut raster = GeoRaster::open(path, self.config.nodata_fallback)?;
        let mask = raster.validity_mask()?;
        footprint_from_mask(&mask, raster.transform(), raster.crs(), &self.config)
            .map_err(|e| match e {
                RasterError::NoValidData(_) => RasterError::NoValidData(path.display().to_string()),
                other => other,
            })
    }
}

/// Derive a footprint from an already decoded mask.
pub fn footprint_from_mask(
    mask: &ValidityMask,
    transform: GeoTransform,
    crs: SourceCrs,
    config: &FootprintConfig,
) -> Result<Footprint> {
    let summary = mask
        .components()?
        .ok_or_else(|| RasterError::NoValidData("mask".to_string()))?;
    let pixel_polygon = summary.largest;
    let traced_vertices = pixel_polygon.exterior().0.len();

    let simplified = if config.simplify_tolerance_px > 0.0 {
        let candidate = pixel_polygon.simplify(&config.simplify_tolerance_px);
        // A ring needs at least 3 distinct points plus the closing one
        if candidate.exterior().0.len() >= 4 {
            candidate
        } else {
            pixel_polygon
        }
    } else {
        pixel_polygon
    };
    let simplified_vertices = simplified.exterior().0.len();

    let mut warnings = Vec::new();
    let mut effective_crs = crs;
    if let SourceCrs::Unknown { .. } = crs {
        if config.assume_geographic {
            warnings.push(QualityWarning::AssumedGeographic { crs });
            effective_crs = SourceCrs::WGS84;
        } else if config.reproject {
            return Err(RasterError::UnsupportedCrs(crs.to_string()));
        }
    }
    if !config.reproject && !effective_crs.is_geographic() {
        warnings.push(QualityWarning::NotReprojected { crs });
    }

    let mut coords: Vec<Coord<f64>> = simplified
        .exterior()
        .coords()
        .map(|c| {
            let (x, y) = transform.apply(c.x, c.y);
            Coord { x, y }
        })
        .collect();
    if config.reproject {
        Reprojection::to_wgs84(effective_crs)?.apply(&mut coords)?;
    }
    let polygon = Polygon::new(LineString::new(coords), vec![]);

    let valid_fraction = mask.valid_fraction();
    let dropped_pixels = summary.valid_pixels.saturating_sub(summary.largest_area);
    if summary.count > 1 {
        warnings.push(QualityWarning::DiscardedComponents {
            components: summary.count,
            dropped_pixels,
        });
    }
    if valid_fraction < config.min_valid_fraction {
        warnings.push(QualityWarning::LowValidFraction {
            fraction: valid_fraction,
        });
    }

    Ok(Footprint {
        polygon,
        stats: FootprintStats {
            dimensions: mask.dimensions(),
            valid_fraction,
            components: summary.count,
            dropped_pixels,
            traced_vertices,
            simplified_vertices,
            source_crs: crs,
        },
        warnings,
    })
}
