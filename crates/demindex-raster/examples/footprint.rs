//! Example: Print the valid-data footprint of a local GeoTIFF tile.
//!
//! Usage: cargo run --example footprint -- <tile.tif> [simplify_tolerance_px]

use demindex_raster::{FootprintConfig, FootprintExtractor, GeoRaster, MaskFootprinter};
use std::env;
use std::path::Path;
use std::time::Instant;

fn main() {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <tile.tif> [simplify_tolerance_px]", args[0]);
        eprintln!("Example: {} tempData/USGS_1M_15_x62y431_MO_WestCentral_2018_D19.tif 2.0", args[0]);
        std::process::exit(1);
    }

    let path = Path::new(&args[1]);
    let mut config = FootprintConfig::default();
    if let Some(tol) = args.get(2) {
        config.simplify_tolerance_px = tol.parse().expect("Invalid tolerance");
    }

    match GeoRaster::open(path, config.nodata_fallback) {
        Ok(raster) => {
            let (w, h) = raster.dimensions();
            println!("{}: {}x{} pixels, CRS {}, nodata {:?}", path.display(), w, h, raster.crs(), raster.no_data_value());
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    let start = Instant::now();
    let footprinter = MaskFootprinter::new(config);
    let footprint = match footprinter.extract(path) {
        Ok(fp) => fp,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    println!(
        "Footprint in {:.2}s: {:.2}% valid, {} component(s), {} -> {} vertices",
        start.elapsed().as_secs_f64(),
        footprint.stats.valid_fraction * 100.0,
        footprint.stats.components,
        footprint.stats.traced_vertices,
        footprint.stats.simplified_vertices
    );
    for warning in &footprint.warnings {
        println!("  warning: {}", warning);
    }
    for c in footprint.polygon.exterior().coords() {
        println!("  {:.7}, {:.7}", c.x, c.y);
    }
}
