//! # demindex-raster
//!
//! Valid-data footprint extraction for USGS elevation GeoTIFF tiles.
//!
//! A downloaded DEM tile is reduced to a boolean valid/no-data mask. GDAL
//! polygonizes the mask, the outer ring of the largest connected valid region
//! is simplified and mapped through the GeoTIFF geotransform, and PROJ
//! reprojects it to WGS84 longitude/latitude.
//!
//! ## Overview
//!
//! USGS 1 meter DEM tiles are published per survey project as 10 km x 10 km
//! GeoTIFFs in a UTM projection, named like
//! `USGS_1M_15_x62y431_MO_WestCentral_2018_D19.tif` where `15` is the UTM zone
//! and `x62y431` the tile origin in units of 10 km. Edges of a project are
//! padded with no-data, so the footprint of a tile is usually smaller than its
//! raster extent.
//!
//! ## Example
//!
//! ```no_run
//! use demindex_raster::{FootprintConfig, FootprintExtractor, MaskFootprinter};
//!
//! let footprinter = MaskFootprinter::new(FootprintConfig::default());
//! let footprint = footprinter.extract("tempData/USGS_1M_15_x62y431_MO_WestCentral_2018_D19.tif".as_ref())?;
//! println!("{} vertices, {:.1}% valid", footprint.polygon.exterior().0.len(), footprint.stats.valid_fraction * 100.0);
//! # Ok::<(), demindex_raster::RasterError>(())
//! ```

mod crs;
mod error;
mod footprint;
mod geotiff;
mod mask;

pub use crs::{Reprojection, SourceCrs};
pub use error::RasterError;
pub use footprint::{
    footprint_from_mask, Footprint, FootprintConfig, FootprintExtractor, FootprintStats,
    MaskFootprinter, QualityWarning, USGS_NODATA,
};
pub use geotiff::{GeoRaster, GeoTransform};
pub use mask::{ComponentSummary, ValidityMask};

/// Result type for raster operations.
pub type Result<T> = std::result::Result<T, RasterError>;
