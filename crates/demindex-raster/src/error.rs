//! Error types for the raster crate.

use thiserror::Error;

/// Errors that can occur while turning a GeoTIFF into a footprint polygon.
#[derive(Debug, Error)]
pub enum RasterError {
    /// I/O error reading a file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TIFF decoding error.
    #[error("TIFF decode error: {0}")]
    TiffDecode(#[from] tiff::TiffError),

    /// Invalid GeoTIFF - missing or malformed georeferencing tags.
    #[error("Invalid GeoTIFF: {0}")]
    InvalidGeoTiff(String),

    /// The raster has no valid (non no-data) pixels at all.
    #[error("Raster {0} contains no valid pixels")]
    NoValidData(String),

    /// The coordinate reference system of the raster is not one we can reproject.
    #[error("Unsupported coordinate reference system: {0}")]
    UnsupportedCrs(String),

    /// GDAL or PROJ reported an error.
    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    /// GDALPolygonize returned a failure code.
    #[error("Polygonizing the validity mask failed (CPLErr {0})")]
    Polygonize(i32),

    /// Raster dimensions disagree with the decoded sample buffer.
    #[error("Decoded {samples} samples for a {width}x{height} raster")]
    SampleCountMismatch {
        /// Number of decoded samples.
        samples: usize,
        /// Raster width in pixels.
        width: u32,
        /// Raster height in pixels.
        height: u32,
    },
}
