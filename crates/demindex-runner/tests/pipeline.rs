//! End-to-end runs of the index builder against an in-memory fetcher.

use demindex_index::{CoverageIndex, IndexRecord};
use demindex_raster::{
    Footprint, FootprintConfig, FootprintExtractor, FootprintStats, MaskFootprinter, RasterError, SourceCrs,
};
use demindex_runner::{Exclusion, Fetcher, IndexBuilder, IndexerConfig, RunSummary, RunnerError};
use geo::polygon;
use shapefile::dbase::{FieldName, FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, Polygon, PolygonRing};
use std::collections::{HashMap, HashSet};
use std::fs::{self, File};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

const LINK_PREFIX: &str = "http://prd-tnm.s3.amazonaws.com/index.html?prefix=StagedProducts/Elevation/1m/Projects/";
const DIR_PREFIX: &str = "https://rockyweb.usgs.gov/vdelivery/Datasets/Staged/Elevation/1m/Projects/";
const MIRROR_PREFIX: &str = "http://prd-tnm.s3.amazonaws.com/StagedProducts/Elevation/1m/Projects/";

// ============================================================================
// Test doubles
// ============================================================================

/// Serves listing pages from memory and "downloads" small placeholder files.
#[derive(Default)]
struct MockFetcher {
    listings: HashMap<String, String>,
    failing: HashSet<String>,
    unwritable: HashSet<String>,
    body: Option<Arc<Vec<u8>>>,
    downloads: Arc<Mutex<Vec<String>>>,
}

impl MockFetcher {
    fn with_listing(mut self, project: &str, names: &[String]) -> Self {
        self.listings.insert(directory_url(project), listing_page(names));
        self
    }

    fn failing(mut self, url: String) -> Self {
        self.failing.insert(url);
        self
    }

    /// Fail `url` as if the scratch file could not be written.
    fn unwritable(mut self, url: String) -> Self {
        self.unwritable.insert(url);
        self
    }

    /// Serve `body` for every download instead of a placeholder.
    fn serving(mut self, body: Vec<u8>) -> Self {
        self.body = Some(Arc::new(body));
        self
    }

    fn download_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.downloads)
    }
}

impl Fetcher for MockFetcher {
    fn get_text(&self, url: &str) -> demindex_runner::Result<String> {
        self.listings.get(url).cloned().ok_or_else(|| RunnerError::HttpStatus {
            url: url.to_string(),
            status: 404,
        })
    }

    fn download(&self, url: &str, dest: &Path) -> demindex_runner::Result<u64> {
        self.downloads.lock().unwrap().push(url.to_string());
        if self.failing.contains(url) {
            return Err(RunnerError::HttpStatus {
                url: url.to_string(),
                status: 503,
            });
        }
        if self.unwritable.contains(url) {
            return Err(RunnerError::Download {
                url: url.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::StorageFull, "no space left on device"),
            });
        }
        let body = self.body.as_deref().map_or(url.as_bytes(), Vec::as_slice);
        fs::write(dest, body)?;
        Ok(body.len() as u64)
    }
}

/// Returns a fixed square for every tile. Fails for names containing
/// `corrupt` and panics for names containing `panic`.
struct StubExtractor;

impl FootprintExtractor for StubExtractor {
    fn extract(&self, path: &Path) -> demindex_raster::Result<Footprint> {
        assert!(path.exists(), "extractor ran before the download finished");
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.contains("corrupt") {
            return Err(RasterError::InvalidGeoTiff(format!("{}: truncated strip", name)));
        }
        if name.contains("panic") {
            panic!("decoder bug on {}", name);
        }
        Ok(Footprint {
            polygon: polygon![
                (x: -92.0, y: 38.0),
                (x: -92.0, y: 38.1),
                (x: -91.9, y: 38.1),
                (x: -91.9, y: 38.0),
                (x: -92.0, y: 38.0),
            ],
            stats: FootprintStats {
                dimensions: (10_012, 10_012),
                valid_fraction: 1.0,
                components: 1,
                dropped_pixels: 0,
                traced_vertices: 4,
                simplified_vertices: 4,
                source_crs: SourceCrs::Projected { epsg: 26915 },
            },
            warnings: Vec::new(),
        })
    }
}

/// Raises the stop flag after its first tile, as Ctrl-C would mid-region.
struct StoppingExtractor {
    stop: Arc<AtomicBool>,
}

impl FootprintExtractor for StoppingExtractor {
    fn extract(&self, path: &Path) -> demindex_raster::Result<Footprint> {
        self.stop.store(true, Ordering::SeqCst);
        StubExtractor.extract(path)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

fn directory_url(project: &str) -> String {
    format!("{}{}/TIFF", DIR_PREFIX, project)
}

fn mirror_url(project: &str, name: &str) -> String {
    format!("{}{}/TIFF/{}", MIRROR_PREFIX, project, name)
}

fn tile_names(project: &str, count: usize) -> Vec<String> {
    (0..count)
        .map(|i| format!("USGS_1M_15_x{}y431_{}.tif", 60 + i, project))
        .collect()
}

fn listing_page(names: &[String]) -> String {
    let mut html = String::from("<html><body><pre>\n");
    for name in names {
        html.push_str(&format!("<a href=\"{0}\">{0}</a>  2020-06-01 10:00  412M\n", name));
    }
    html.push_str("</pre></body></html>\n");
    html
}

/// A 32x32 NAD83 / UTM 15N float GeoTIFF whose western half is valid.
fn half_valid_geotiff() -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut bytes).unwrap();
        let mut image = encoder.new_image::<colortype::Gray32Float>(32, 32).unwrap();
        image
            .encoder()
            .write_tag(Tag::ModelTiepointTag, &[0.0, 0.0, 0.0, 620_000.0, 4_320_000.0, 0.0][..])
            .unwrap();
        image.encoder().write_tag(Tag::ModelPixelScaleTag, &[1.0, 1.0, 0.0][..]).unwrap();
        image
            .encoder()
            .write_tag(Tag::GeoKeyDirectoryTag, &[1u16, 1, 0, 3, 1024, 0, 1, 1, 1025, 0, 1, 1, 3072, 0, 1, 26915][..])
            .unwrap();
        image.encoder().write_tag(Tag::GdalNodata, "-999999").unwrap();
        let data: Vec<f32> = (0..32 * 32).map(|i| if i % 32 < 16 { 215.0 } else { -999_999.0 }).collect();
        image.write_data(&data).unwrap();
    }
    bytes.into_inner()
}

fn square(x: f64, y: f64) -> Polygon {
    Polygon::new(PolygonRing::Outer(vec![
        Point::new(x, y),
        Point::new(x, y + 1.0),
        Point::new(x + 1.0, y + 1.0),
        Point::new(x + 1.0, y),
        Point::new(x, y),
    ]))
}

/// Coverage layer with one row per project. Links use the hyphenated S3
/// browser form so the rewrite chain is exercised.
fn write_coverage(dir: &Path, projects: &[&str]) -> PathBuf {
    let path = dir.join("coverage.shp");
    let table = TableWriterBuilder::new()
        .add_character_field(FieldName::try_from("project").unwrap(), 100)
        .add_character_field(FieldName::try_from("product_li").unwrap(), 200);
    let mut writer = shapefile::Writer::from_path(&path, table).unwrap();
    for (i, project) in projects.iter().enumerate() {
        let link = format!("{}{}", LINK_PREFIX, project.replacen('_', "-", 1));
        let mut record = Record::default();
        record.insert("project".to_string(), FieldValue::Character(Some(project.to_string())));
        record.insert("product_li".to_string(), FieldValue::Character(Some(link)));
        writer.write_shape_and_record(&square(-93.0 + i as f64, 37.0), &record).unwrap();
    }
    path
}

struct Workspace {
    dir: TempDir,
    config: IndexerConfig,
}

impl Workspace {
    fn new(projects: &[&str]) -> Self {
        let dir = TempDir::new().unwrap();
        let mut config = IndexerConfig::default();
        config.input.path = write_coverage(dir.path(), projects);
        config.output.dir = dir.path().join("output");
        config.output.backup_dir = dir.path().join("zips");
        config.scratch_dir = dir.path().join("scratch");
        Self { dir, config }
    }

    fn run(&self, fetcher: MockFetcher) -> RunSummary {
        self.run_with(self.config.clone(), fetcher)
    }

    fn run_with(&self, config: IndexerConfig, fetcher: MockFetcher) -> RunSummary {
        self.run_extractor(config, fetcher, Box::new(StubExtractor))
    }

    fn run_extractor(&self, config: IndexerConfig, fetcher: MockFetcher, extractor: Box<dyn FootprintExtractor>) -> RunSummary {
        let builder = IndexBuilder::new(config, Box::new(fetcher), extractor).unwrap();
        builder.run().unwrap()
    }

    fn records(&self) -> Vec<IndexRecord> {
        CoverageIndex::read_records(&self.config.output.dir, &self.config.output.file_name).unwrap()
    }

    fn indexed_links(&self) -> HashSet<String> {
        self.records().into_iter().map(|r| r.linkaws).collect()
    }
}

// ============================================================================
// Resumable builds
// ============================================================================

#[test]
fn test_second_run_downloads_nothing() {
    let ws = Workspace::new(&["MO_Test_2018"]);
    let names = tile_names("MO_Test_2018", 3);

    let first = ws.run(MockFetcher::default().with_listing("MO_Test_2018", &names));
    assert!(first.completed());
    assert_eq!(first.regions_processed, 1);
    assert_eq!(first.tiles_indexed, 3);

    let fetcher = MockFetcher::default().with_listing("MO_Test_2018", &names);
    let log = fetcher.download_log();
    let second = ws.run(fetcher);
    assert_eq!(second.tiles_indexed, 0);
    assert_eq!(second.tiles_already_indexed, 3);
    assert!(log.lock().unwrap().is_empty());

    let records = ws.records();
    assert_eq!(records.len(), 3);
    let record = &records[0];
    assert_eq!(record.project, "MO_Test_2018");
    assert_eq!(record.link, format!("{}/{}", directory_url("MO_Test_2018"), names[0]));
    assert_eq!(record.linkaws, mirror_url("MO_Test_2018", &names[0]));
}

#[test]
fn test_shapefile_is_written() {
    let ws = Workspace::new(&["MO_Test_2018"]);
    ws.run(MockFetcher::default().with_listing("MO_Test_2018", &tile_names("MO_Test_2018", 2)));

    let shp = ws.config.output.dir.join("1m_usgs_dem_coverage.shp");
    for ext in ["shp", "shx", "dbf", "prj"] {
        assert!(shp.with_extension(ext).exists(), "missing .{}", ext);
    }
    let from_shapefile = demindex_index::read_index_shapefile(&shp).unwrap();
    assert_eq!(from_shapefile.len(), 2);
}

#[test]
fn test_duplicate_listing_entries_indexed_once() {
    let ws = Workspace::new(&["MO_Test_2018"]);
    let mut names = tile_names("MO_Test_2018", 2);
    names.push(names[0].clone());
    names.push(names[1].clone());

    let fetcher = MockFetcher::default().with_listing("MO_Test_2018", &names);
    let log = fetcher.download_log();
    let summary = ws.run(fetcher);

    assert_eq!(summary.tiles_indexed, 2);
    assert_eq!(log.lock().unwrap().len(), 2);
    assert_eq!(ws.records().len(), 2);
}

// ============================================================================
// Failure handling
// ============================================================================

#[test]
fn test_failed_download_does_not_stop_region() {
    let ws = Workspace::new(&["MO_Test_2018"]);
    let names = tile_names("MO_Test_2018", 4);
    let bad = mirror_url("MO_Test_2018", &names[1]);

    let summary = ws.run(
        MockFetcher::default()
            .with_listing("MO_Test_2018", &names)
            .failing(bad.clone()),
    );
    assert!(summary.completed());
    assert_eq!(summary.downloads_failed, 1);
    assert_eq!(summary.tiles_indexed, 3);
    assert!(!ws.indexed_links().contains(&bad));

    // The failed tile is retried on the next run
    let fetcher = MockFetcher::default().with_listing("MO_Test_2018", &names);
    let log = fetcher.download_log();
    let retry = ws.run(fetcher);
    assert_eq!(retry.tiles_indexed, 1);
    assert_eq!(*log.lock().unwrap(), vec![bad]);
}

#[test]
fn test_unreadable_tile_is_skipped() {
    let ws = Workspace::new(&["MO_Test_2018"]);
    let mut names = tile_names("MO_Test_2018", 2);
    names.insert(1, "USGS_1M_15_corrupt_MO_Test_2018.tif".to_string());

    let summary = ws.run(MockFetcher::default().with_listing("MO_Test_2018", &names));
    assert_eq!(summary.footprints_failed, 1);
    assert_eq!(summary.tiles_indexed, 2);
    assert!(summary.completed());
}

#[test]
fn test_scratch_write_failure_counts_as_download_failure() {
    let ws = Workspace::new(&["MO_Test_2018"]);
    let names = tile_names("MO_Test_2018", 3);

    let summary = ws.run(
        MockFetcher::default()
            .with_listing("MO_Test_2018", &names)
            .unwritable(mirror_url("MO_Test_2018", &names[1])),
    );
    assert_eq!(summary.downloads_failed, 1);
    assert_eq!(summary.footprints_failed, 0);
    assert_eq!(summary.tiles_indexed, 2);
}

#[test]
fn test_extractor_panic_is_a_footprint_failure() {
    for workers in [1, 3] {
        let mut ws = Workspace::new(&["MO_Test_2018"]);
        ws.config.workers = workers;
        let mut names = tile_names("MO_Test_2018", 5);
        names.insert(2, "USGS_1M_15_panic_MO_Test_2018.tif".to_string());

        let summary = ws.run(MockFetcher::default().with_listing("MO_Test_2018", &names));
        assert!(summary.completed(), "workers = {}", workers);
        assert_eq!(summary.footprints_failed, 1, "workers = {}", workers);
        assert_eq!(summary.tiles_indexed, 5, "workers = {}", workers);
    }
}

#[test]
fn test_failed_checkpoint_aborts_run_and_keeps_records() {
    let ws = Workspace::new(&["MO_Test_2018", "TN_West_2020"]);
    // A regular file where the backup directory should be
    fs::write(&ws.config.output.backup_dir, b"not a directory").unwrap();

    let fetcher = MockFetcher::default()
        .with_listing("MO_Test_2018", &tile_names("MO_Test_2018", 12))
        .with_listing("TN_West_2020", &tile_names("TN_West_2020", 2));
    let log = fetcher.download_log();
    let summary = ws.run(fetcher);

    assert!(summary.aborted.is_some());
    assert!(!summary.completed());
    assert_eq!(summary.regions_processed, 0);
    assert_eq!(summary.tiles_indexed, 10);
    assert_eq!(summary.checkpoints, 0);
    // The loop stopped at the failed checkpoint
    assert_eq!(log.lock().unwrap().len(), 10);
    assert_eq!(ws.records().len(), 10);
}

#[test]
fn test_unreachable_listing_skips_region() {
    let ws = Workspace::new(&["IL_Missing_2019", "MO_Test_2018"]);
    let summary = ws.run(MockFetcher::default().with_listing("MO_Test_2018", &tile_names("MO_Test_2018", 2)));

    assert_eq!(summary.regions_processed, 2);
    assert_eq!(summary.regions_skipped, 1);
    assert_eq!(summary.tiles_indexed, 2);
}

#[test]
fn test_oversized_listing_skips_region() {
    let mut ws = Workspace::new(&["MO_Big_2018", "MO_Test_2018"]);
    ws.config.listing.max_matches = 3;

    let fetcher = MockFetcher::default()
        .with_listing("MO_Big_2018", &tile_names("MO_Big_2018", 4))
        .with_listing("MO_Test_2018", &tile_names("MO_Test_2018", 3));
    let log = fetcher.download_log();
    let summary = ws.run(fetcher);

    assert_eq!(summary.regions_skipped, 1);
    assert_eq!(summary.tiles_indexed, 3);
    assert!(log.lock().unwrap().iter().all(|url| !url.contains("MO_Big_2018")));
}

#[test]
fn test_missing_coverage_layer_is_fatal() {
    let mut ws = Workspace::new(&["MO_Test_2018"]);
    ws.config.input.path = ws.dir.path().join("nope.shp");
    let builder = IndexBuilder::new(ws.config.clone(), Box::new(MockFetcher::default()), Box::new(StubExtractor)).unwrap();
    assert!(builder.run().is_err());
}

// ============================================================================
// Exclusions, checkpoints, stopping
// ============================================================================

#[test]
fn test_excluded_tile_is_never_downloaded() {
    let mut ws = Workspace::new(&["IL_HicksDome_2019"]);
    let names = tile_names("IL_HicksDome_2019", 3);
    ws.config.exclusions.push(Exclusion {
        project: "IL_HicksDome_2019".to_string(),
        file_name: names[2].clone(),
    });

    let fetcher = MockFetcher::default().with_listing("IL_HicksDome_2019", &names);
    let log = fetcher.download_log();
    let summary = ws.run(fetcher);

    assert_eq!(summary.tiles_excluded, 1);
    assert_eq!(summary.tiles_indexed, 2);
    let excluded = mirror_url("IL_HicksDome_2019", &names[2]);
    assert!(!log.lock().unwrap().contains(&excluded));
    assert!(!ws.indexed_links().contains(&excluded));
}

#[test]
fn test_checkpoint_bundle_after_ten_tiles() {
    let ws = Workspace::new(&["MO_Test_2018"]);
    let summary = ws.run(MockFetcher::default().with_listing("MO_Test_2018", &tile_names("MO_Test_2018", 12)));

    assert_eq!(summary.checkpoints, 1);
    let bundle = ws.config.output.backup_dir.join("bak_MO_Test_2018_10.zip");
    assert!(bundle.exists());
    assert!(!ws.config.output.backup_dir.join("bak_MO_Test_2018_12.zip").exists());

    let archive = zip::ZipArchive::new(File::open(&bundle).unwrap()).unwrap();
    let entries: HashSet<&str> = archive.file_names().collect();
    assert!(entries.contains("1m_usgs_dem_coverage.shp"));
    assert!(entries.contains("1m_usgs_dem_coverage.dbf"));
}

#[test]
fn test_stop_flag_before_start() {
    let ws = Workspace::new(&["MO_Test_2018"]);
    let stop = Arc::new(AtomicBool::new(true));
    let builder = IndexBuilder::new(
        ws.config.clone(),
        Box::new(MockFetcher::default().with_listing("MO_Test_2018", &tile_names("MO_Test_2018", 2))),
        Box::new(StubExtractor),
    )
    .unwrap()
    .with_stop_flag(Arc::clone(&stop));

    let summary = builder.run().unwrap();
    assert!(summary.interrupted);
    assert!(!summary.completed());
    assert_eq!(summary.regions_processed, 0);
    assert!(stop.load(Ordering::SeqCst));
}

#[test]
fn test_stop_mid_region_is_not_counted_as_processed() {
    let mut ws = Workspace::new(&["MO_Test_2018", "TN_West_2020"]);
    ws.config.workers = 1;
    let stop = Arc::new(AtomicBool::new(false));
    let fetcher = MockFetcher::default()
        .with_listing("MO_Test_2018", &tile_names("MO_Test_2018", 3))
        .with_listing("TN_West_2020", &tile_names("TN_West_2020", 3));
    let builder = IndexBuilder::new(
        ws.config.clone(),
        Box::new(fetcher),
        Box::new(StoppingExtractor {
            stop: Arc::clone(&stop),
        }),
    )
    .unwrap()
    .with_stop_flag(stop);

    let summary = builder.run().unwrap();
    assert!(summary.interrupted);
    assert_eq!(summary.regions_processed, 0);
    assert_eq!(summary.tiles_indexed, 1);
    assert_eq!(ws.records().len(), 1);
}

// ============================================================================
// Real GeoTIFF footprints
// ============================================================================

#[test]
fn test_geotiff_tiles_are_indexed_with_their_footprint() {
    let ws = Workspace::new(&["MO_Test_2018"]);
    let names = tile_names("MO_Test_2018", 2);
    let fetcher = MockFetcher::default()
        .with_listing("MO_Test_2018", &names)
        .serving(half_valid_geotiff());

    let extractor = MaskFootprinter::new(FootprintConfig::default());
    let summary = ws.run_extractor(ws.config.clone(), fetcher, Box::new(extractor));
    assert!(summary.completed());
    assert_eq!(summary.footprints_failed, 0);
    assert_eq!(summary.tiles_indexed, 2);

    for record in ws.records() {
        let ring = &record.footprint;
        assert_eq!(ring.len(), 5, "half-valid tile is a rectangle");
        assert_eq!(ring.first(), ring.last());
        for &[lon, lat] in ring {
            // 620 km east in UTM 15N, around 39°N
            assert!(lon > -91.7 && lon < -91.5, "lon {}", lon);
            assert!(lat > 38.9 && lat < 39.1, "lat {}", lat);
        }
        let lons: Vec<f64> = ring.iter().map(|c| c[0]).collect();
        let width = lons.iter().cloned().fold(f64::NEG_INFINITY, f64::max) - lons.iter().cloned().fold(f64::INFINITY, f64::min);
        // 16 m of longitude at 39°N
        assert!(width > 1.5e-4 && width < 2.2e-4, "width {}", width);
    }
}

// ============================================================================
// Worker pool
// ============================================================================

#[test]
fn test_parallel_workers_index_every_tile() {
    let mut ws = Workspace::new(&["MO_Test_2018", "TN_West_2020"]);
    ws.config.workers = 3;

    let mo = tile_names("MO_Test_2018", 11);
    let tn = tile_names("TN_West_2020", 5);
    let bad = mirror_url("TN_West_2020", &tn[3]);
    let fetcher = MockFetcher::default()
        .with_listing("MO_Test_2018", &mo)
        .with_listing("TN_West_2020", &tn)
        .failing(bad.clone());
    let summary = ws.run(fetcher);

    assert!(summary.completed());
    assert_eq!(summary.tiles_indexed, 15);
    assert_eq!(summary.downloads_failed, 1);
    assert_eq!(summary.checkpoints, 1);

    let expected: HashSet<String> = mo
        .iter()
        .map(|n| mirror_url("MO_Test_2018", n))
        .chain(tn.iter().map(|n| mirror_url("TN_West_2020", n)))
        .filter(|url| *url != bad)
        .collect();
    assert_eq!(ws.indexed_links(), expected);

    // Scratch slots are empty after the run
    for entry in fs::read_dir(&ws.config.scratch_dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            assert_eq!(fs::read_dir(&path).unwrap().count(), 0);
        }
    }
}

#[test]
fn test_parallel_matches_sequential() {
    let names = tile_names("MO_Test_2018", 7);

    let sequential = Workspace::new(&["MO_Test_2018"]);
    sequential.run(MockFetcher::default().with_listing("MO_Test_2018", &names));

    let mut parallel = Workspace::new(&["MO_Test_2018"]);
    parallel.config.workers = 4;
    let config = parallel.config.clone();
    parallel.run_with(config, MockFetcher::default().with_listing("MO_Test_2018", &names));

    assert_eq!(sequential.indexed_links(), parallel.indexed_links());
}
