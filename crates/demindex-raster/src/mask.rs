//! Boolean valid/no-data mask and its connected valid regions.
//!
//! Regions are found by GDAL's polygonizer on an in-memory byte raster with
//! identity georeferencing, so polygons come back in pixel-corner
//! coordinates. Components use 4-connectivity.

use crate::{RasterError, Result};
use gdal::raster::Buffer;
use gdal::vector::{LayerAccess, LayerOptions, OGRFieldType};
use gdal::DriverManager;
use gdal_sys::CPLErr;
use geo::{Area, Geometry, Polygon};

/// Row-major valid/no-data mask (row 0 is the top of the raster).
#[derive(Debug, Clone)]
pub struct ValidityMask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

/// The connected valid regions of a mask.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentSummary {
    /// Number of 4-connected valid components.
    pub count: usize,
    /// Total number of valid pixels.
    pub valid_pixels: u64,
    /// Pixel count of the largest component.
    pub largest_area: u64,
    /// Outer ring of the largest component in pixel-corner coordinates.
    /// Holes are dropped.
    pub largest: Polygon<f64>,
}

impl ValidityMask {
    /// Create a mask from row-major bits.
    ///
    /// # Panics
    /// Panics if `bits.len() != width * height`.
    pub fn new(width: u32, height: u32, bits: Vec<bool>) -> Self {
        assert_eq!(bits.len(), width as usize * height as usize, "mask size mismatch");
        Self { width, height, bits }
    }

    /// Build a mask by evaluating `f(col, row)` for every pixel.
    pub fn from_fn(width: u32, height: u32, f: impl Fn(u32, u32) -> bool) -> Self {
        let mut bits = Vec::with_capacity(width as usize * height as usize);
        for row in 0..height {
            for col in 0..width {
                bits.push(f(col, row));
            }
        }
        Self { width, height, bits }
    }

    /// Width and height in pixels.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of valid pixels.
    pub fn valid_count(&self) -> u64 {
        self.bits.iter().filter(|b| **b).count() as u64
    }

    /// Fraction of pixels that are valid.
    pub fn valid_fraction(&self) -> f64 {
        if self.bits.is_empty() {
            0.0
        } else {
            self.valid_count() as f64 / self.bits.len() as f64
        }
    }

    /// Polygonize the valid pixels, one polygon per 4-connected component,
    /// in pixel-corner coordinates.
    pub fn polygonize(&self) -> Result<Vec<Polygon<f64>>> {
        let (w, h) = (self.width as usize, self.height as usize);
        if w == 0 || h == 0 {
            return Ok(Vec::new());
        }

        let mut raster = DriverManager::get_driver_by_name("MEM")?.create_with_band_type::<u8, _>("", w, h, 1)?;
        // Identity: x = column, y = row
        raster.set_geo_transform(&[0.0, 1.0, 0.0, 0.0, 0.0, 1.0])?;
        let mut band = raster.rasterband(1)?;
        let data: Vec<u8> = self.bits.iter().map(|&valid| valid as u8).collect();
        let mut buffer = Buffer::new((w, h), data);
        band.write((0, 0), (w, h), &mut buffer)?;

        let mut vectors = DriverManager::get_driver_by_name("Memory")?.create_vector_only("")?;
        let mut layer = vectors.create_layer(LayerOptions {
            name: "components",
            ..Default::default()
        })?;
        layer.create_defn_fields(&[("valid", OGRFieldType::OFTInteger)])?;

        // The band doubles as its own mask so zero pixels yield no polygons
        let rc = unsafe {
            gdal_sys::GDALPolygonize(
                band.c_rasterband(),
                band.c_rasterband(),
                layer.c_layer(),
                0,
                std::ptr::null_mut(),
                None,
                std::ptr::null_mut(),
            )
        };
        if rc != CPLErr::CE_None {
            return Err(RasterError::Polygonize(rc as i32));
        }

        let mut polygons = Vec::new();
        for feature in layer.features() {
            let geometry = match feature.geometry() {
                Some(g) => g.to_geo()?,
                None => continue,
            };
            match geometry {
                Geometry::Polygon(p) => polygons.push(p),
                Geometry::MultiPolygon(mp) => polygons.extend(mp.0),
                _ => {}
            }
        }
        Ok(polygons)
    }

    /// Find the 4-connected valid components and the largest one.
    ///
    /// Returns `None` if the mask has no valid pixels.
    pub fn components(&self) -> Result<Option<ComponentSummary>> {
        let polygons = self.polygonize()?;
        let count = polygons.len();
        let largest = polygons
            .into_iter()
            .map(|p| (p.unsigned_area(), p))
            .max_by(|a, b| a.0.total_cmp(&b.0));

        let (area, polygon) = match largest {
            Some(l) => l,
            None => return Ok(None),
        };
        Ok(Some(ComponentSummary {
            count,
            valid_pixels: self.valid_count(),
            // Pixel-aligned rings have integral area
            largest_area: area.round() as u64,
            largest: Polygon::new(polygon.exterior().clone(), vec![]),
        }))
    }
}
