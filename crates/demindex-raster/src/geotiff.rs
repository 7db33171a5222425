//! GeoTIFF tile reading: geotransform, no-data value, CRS and validity mask.

use crate::crs::{SourceCrs, GT_RASTER_TYPE_KEY};
use crate::mask::ValidityMask;
use crate::{RasterError, Result};
use std::fs::File;
use std::io::{BufReader, Read, Seek};
use std::path::{Path, PathBuf};
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

/// RasterTypeGeoKey value for PixelIsPoint.
const RASTER_PIXEL_IS_POINT: u16 = 2;

/// Affine mapping from pixel (column, row) to the raster's native CRS.
///
/// Same layout as a GDAL geotransform:
/// `x = c0 + col * c1 + row * c2`, `y = c3 + col * c4 + row * c5`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform from an upper-left origin and pixel sizes.
    pub fn north_up(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        GeoTransform([origin_x, pixel_width, 0.0, origin_y, 0.0, -pixel_height])
    }

    /// Map a pixel-corner coordinate to native CRS coordinates.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        let g = &self.0;
        (g[0] + col * g[1] + row * g[2], g[3] + col * g[4] + row * g[5])
    }

    /// Shift the origin by a fraction of a pixel.
    fn shifted(&self, dcol: f64, drow: f64) -> Self {
        let (x, y) = self.apply(dcol, drow);
        let g = self.0;
        GeoTransform([x, g[1], g[2], y, g[4], g[5]])
    }
}

/// An opened GeoTIFF tile with its georeferencing metadata.
///
/// Pixel data is not decoded until [`GeoRaster::validity_mask`] is called.
pub struct GeoRaster {
    path: PathBuf,
    decoder: Decoder<BufReader<File>>,
    width: u32,
    height: u32,
    transform: GeoTransform,
    crs: SourceCrs,
    no_data_value: Option<f64>,
}

impl std::fmt::Debug for GeoRaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeoRaster")
            .field("path", &self.path)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("transform", &self.transform)
            .field("crs", &self.crs)
            .field("no_data_value", &self.no_data_value)
            .finish()
    }
}

impl GeoRaster {
    /// Open a GeoTIFF and read its georeferencing tags.
    ///
    /// `nodata_fallback` is used when the file carries no GDAL_NODATA tag.
    pub fn open<P: AsRef<Path>>(path: P, nodata_fallback: Option<f64>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?;

        // 1 m tiles are 10012 x 10012 float32 pixels, ~400 MB decoded
        const ONE_GIB: usize = 1 << 30;
        let mut limits = Limits::default();
        limits.decoding_buffer_size = ONE_GIB;
        limits.intermediate_buffer_size = ONE_GIB;
        limits.ifd_value_size = ONE_GIB;
        decoder = decoder.with_limits(limits);

        let (width, height) = decoder.dimensions()?;
        let geokeys = Self::read_geokeys(&mut decoder);
        let mut transform = Self::read_geotransform(&mut decoder, path)?;

        // PixelIsPoint tie points refer to pixel centers
        if geokeys
            .iter()
            .any(|&(k, v)| k == GT_RASTER_TYPE_KEY && v == RASTER_PIXEL_IS_POINT)
        {
            transform = transform.shifted(-0.5, -0.5);
        }

        let mut crs = SourceCrs::from_geokeys(&geokeys);
        if let SourceCrs::Unknown { .. } = crs {
            if let Some(hint) = path
                .file_name()
                .and_then(|s| s.to_str())
                .and_then(SourceCrs::from_usgs_filename)
            {
                crs = hint;
            }
        }

        let no_data_value = Self::read_nodata_value(&mut decoder).or(nodata_fallback);

        Ok(Self {
            path: path.to_path_buf(),
            decoder,
            width,
            height,
            transform,
            crs,
            no_data_value,
        })
    }

    /// Read the geotransform from ModelTransformation, or ModelTiepoint + ModelPixelScale.
    fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>, path: &Path) -> Result<GeoTransform> {
        if let Ok(m) = decoder.get_tag_f64_vec(Tag::ModelTransformationTag) {
            if m.len() >= 8 {
                return Ok(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]));
            }
        }

        let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag);
        let pixel_scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag);

        if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) {
            if tiepoint.len() >= 6 && scale.len() >= 2 {
                // [i, j, k, x, y, z]: raster point (i, j) sits at model point (x, y)
                let (tie_i, tie_j) = (tiepoint[0], tiepoint[1]);
                let (tie_x, tie_y) = (tiepoint[3], tiepoint[4]);
                let (scale_x, scale_y) = (scale[0], scale[1]);

                let origin_x = tie_x - tie_i * scale_x;
                let origin_y = tie_y + tie_j * scale_y;
                return Ok(GeoTransform::north_up(origin_x, origin_y, scale_x, scale_y));
            }
        }

        Err(RasterError::InvalidGeoTiff(format!(
            "{}: no ModelTransformation or ModelTiepoint/ModelPixelScale tags",
            path.display()
        )))
    }

    /// Read `(key id, value)` pairs for GeoKeys stored inline in the directory.
    fn read_geokeys<R: Read + Seek>(decoder: &mut Decoder<R>) -> Vec<(u16, u16)> {
        let dir = match decoder.get_tag_u16_vec(Tag::GeoKeyDirectoryTag) {
            Ok(dir) if dir.len() >= 4 => dir,
            _ => return Vec::new(),
        };

        // Header: [version, revision, minor, key count], then 4 shorts per key:
        // [key id, tag location, count, value]. Location 0 means the value is inline.
        let count = dir[3] as usize;
        dir[4..]
            .chunks_exact(4)
            .take(count)
            .filter(|entry| entry[1] == 0)
            .map(|entry| (entry[0], entry[3]))
            .collect()
    }

    /// Try to read the no-data value from the GDAL_NODATA tag.
    fn read_nodata_value<R: Read + Seek>(decoder: &mut Decoder<R>) -> Option<f64> {
        decoder
            .get_tag_ascii_string(Tag::GdalNodata)
            .ok()
            .and_then(|s| s.trim().trim_end_matches('\0').parse().ok())
    }

    /// Decode the first band into a valid/no-data mask.
    ///
    /// A pixel is valid when it is finite and does not equal the no-data value.
    /// A NaN no-data value marks only non-finite pixels as no-data.
    pub fn validity_mask(&mut self) -> Result<ValidityMask> {
        let result = self.decoder.read_image()?;
        let nodata = self.no_data_value.filter(|nd| !nd.is_nan());
        let is_valid = |v: f64| v.is_finite() && nodata.map_or(true, |nd| (v - nd).abs() >= 1e-3);

        let bits: Vec<bool> = match result {
            DecodingResult::F32(data) => Self::mask_samples(data, |v| is_valid(v as f64)),
            DecodingResult::F64(data) => Self::mask_samples(data, is_valid),
            DecodingResult::I16(data) => Self::mask_samples(data, |v| is_valid(v as f64)),
            DecodingResult::I32(data) => Self::mask_samples(data, |v| is_valid(v as f64)),
            DecodingResult::U16(data) => Self::mask_samples(data, |v| is_valid(v as f64)),
            DecodingResult::U32(data) => Self::mask_samples(data, |v| is_valid(v as f64)),
            DecodingResult::U8(data) => Self::mask_samples(data, |v| is_valid(v as f64)),
            DecodingResult::I8(data) => Self::mask_samples(data, |v| is_valid(v as f64)),
            DecodingResult::U64(data) => Self::mask_samples(data, |v| is_valid(v as f64)),
            DecodingResult::I64(data) => Self::mask_samples(data, |v| is_valid(v as f64)),
        };

        let pixels = self.width as usize * self.height as usize;
        if pixels == 0 || bits.len() % pixels != 0 {
            return Err(RasterError::SampleCountMismatch {
                samples: bits.len(),
                width: self.width,
                height: self.height,
            });
        }

        // Interleaved multi-sample pixels: only the first sample counts
        let samples_per_pixel = bits.len() / pixels;
        let bits = if samples_per_pixel == 1 {
            bits
        } else {
            bits.into_iter().step_by(samples_per_pixel).collect()
        };

        Ok(ValidityMask::new(self.width, self.height, bits))
    }

    fn mask_samples<T: Copy>(data: Vec<T>, is_valid: impl Fn(T) -> bool) -> Vec<bool> {
        data.into_iter().map(is_valid).collect()
    }

    /// Get the dimensions of this raster in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Pixel-to-CRS geotransform.
    pub fn transform(&self) -> GeoTransform {
        self.transform
    }

    /// Coordinate reference system decoded from GeoKeys or the file name.
    pub fn crs(&self) -> SourceCrs {
        self.crs
    }

    /// No-data value in effect for the validity mask.
    pub fn no_data_value(&self) -> Option<f64> {
        self.no_data_value
    }
}
