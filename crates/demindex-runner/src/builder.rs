//! The index build loop.
//!
//! ```text
//! for region in coverage layer:
//!     directory = rewrite(region link)
//!     tiles     = distinct tile names in GET(directory)
//!     for tile in tiles:
//!         skip if its mirror link is indexed, or it is excluded
//!         download -> footprint -> append record -> clear scratch
//!         bundle the output directory when a checkpoint is due
//! ```
//!
//! With `workers > 1` the download and footprint steps of one region run on
//! a pool of scoped threads. The calling thread stays the only writer: it
//! filters tiles, hands them out over a channel, appends results and takes
//! checkpoints, so the index needs no locking.

use crate::checkpoint::CheckpointPolicy;
use crate::config::IndexerConfig;
use crate::exclusions::ExclusionSet;
use crate::fetch::Fetcher;
use crate::listing::{TileLink, TileLister};
use crate::rules::RewriteChain;
use crate::scratch::{ScratchDir, ScratchSlot};
use crate::{Result, RunnerError};
use crossbeam_channel::{bounded, unbounded};
use demindex_index::{AppendOutcome, CoverageIndex, CoverageReader, CoverageRegion, IndexRecord};
use demindex_raster::{Footprint, FootprintExtractor};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Counters for one run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Regions whose processing finished, including skipped ones. A region
    /// cut short by a stop request is not counted.
    pub regions_processed: usize,
    /// Regions skipped because the listing failed or looked wrong.
    pub regions_skipped: usize,
    /// Records appended to the index.
    pub tiles_indexed: usize,
    /// Tiles already present in the index.
    pub tiles_already_indexed: usize,
    /// Tiles on the exclusion list.
    pub tiles_excluded: usize,
    /// Tiles whose download failed.
    pub downloads_failed: usize,
    /// Tiles whose footprint could not be derived.
    pub footprints_failed: usize,
    /// Backup bundles written.
    pub checkpoints: usize,
    /// The run stopped early on request.
    pub interrupted: bool,
    /// Error that aborted the run, if any.
    pub aborted: Option<String>,
    /// Wall-clock duration.
    pub elapsed: Duration,
}

impl RunSummary {
    /// Whether the run went through every region.
    pub fn completed(&self) -> bool {
        !self.interrupted && self.aborted.is_none()
    }
}

/// Per-region progress kept by the writer thread.
struct RegionProgress<'a> {
    region: &'a CoverageRegion,
    attempted: usize,
    checkpoint: CheckpointPolicy,
}

/// Builds the per-tile coverage index from a coverage layer.
pub struct IndexBuilder {
    config: IndexerConfig,
    fetcher: Box<dyn Fetcher>,
    extractor: Box<dyn FootprintExtractor>,
    chain: RewriteChain,
    lister: TileLister,
    exclusions: ExclusionSet,
    stop: Arc<AtomicBool>,
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("config", &self.config)
            .field("chain", &self.chain)
            .finish()
    }
}

impl IndexBuilder {
    /// Create a builder. The configuration is validated here.
    pub fn new(
        config: IndexerConfig,
        fetcher: Box<dyn Fetcher>,
        extractor: Box<dyn FootprintExtractor>,
    ) -> Result<Self> {
        config.validate()?;
        let chain = config.rewrite.chain();
        let lister = TileLister::new(&config.listing, config.mirror.clone())?;
        let exclusions = ExclusionSet::new(&config.exclusions);
        Ok(Self {
            config,
            fetcher,
            extractor,
            chain,
            lister,
            exclusions,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Use `flag` to request a graceful stop. The run finishes the tiles in
    /// flight, materialises the index and returns.
    pub fn with_stop_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.stop = flag;
        self
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Run over every region of the coverage layer.
    ///
    /// Failing to open the index, the scratch directory or the coverage
    /// layer is an error. An error while processing a region ends the run;
    /// it is logged and reported in [`RunSummary::aborted`], and everything
    /// appended so far is kept.
    pub fn run(&self) -> Result<RunSummary> {
        let start = Instant::now();
        let cfg = &self.config;

        let mut index = CoverageIndex::open_or_create(&cfg.output.dir, &cfg.output.file_name)?;
        let scratch = ScratchDir::prepare(&cfg.scratch_dir)?;
        let mut coverage = CoverageReader::open(&cfg.input.path, &cfg.input.project_field, &cfg.input.link_field)?;

        info!(
            coverage = %coverage.path().display(),
            index = %index.shp_path().display(),
            indexed = index.len(),
            workers = cfg.workers,
            "Starting index build"
        );
        if !self.exclusions.is_empty() {
            info!(tiles = self.exclusions.len(), "Exclusion list loaded");
        }

        let mut summary = RunSummary::default();
        for region in coverage.regions() {
            if self.stop_requested() {
                info!("Stop requested; not starting further regions");
                summary.interrupted = true;
                break;
            }

            let outcome = region
                .map_err(RunnerError::from)
                .and_then(|region| self.process_region(&region, &mut index, &scratch, &mut summary));
            match outcome {
                Ok(true) => summary.regions_processed += 1,
                Ok(false) => {
                    info!("Stop requested; region left unfinished");
                    summary.interrupted = true;
                    break;
                }
                Err(e) => {
                    error!(error = %e, "Region processing failed; stopping run");
                    summary.aborted = Some(e.to_string());
                    break;
                }
            }
        }

        index.materialize()?;
        summary.elapsed = start.elapsed();
        info!(
            regions = summary.regions_processed,
            indexed = summary.tiles_indexed,
            failed = summary.downloads_failed + summary.footprints_failed,
            total = index.len(),
            elapsed_secs = summary.elapsed.as_secs(),
            "Index build finished"
        );
        Ok(summary)
    }

    /// Rewrite a coverage link and list the tiles of its directory.
    ///
    /// Returns the resolved directory URL with the tiles.
    pub fn discover(&self, link: &str) -> Result<(String, Vec<TileLink>)> {
        let directory = self.chain.resolve(link);
        let body = self.fetcher.get_text(&directory)?;
        let tiles = self.lister.parse(&directory, &body)?;
        Ok((directory, tiles))
    }

    /// Returns false when a stop request left tiles of the region unattempted.
    fn process_region(
        &self,
        region: &CoverageRegion,
        index: &mut CoverageIndex,
        scratch: &ScratchDir,
        summary: &mut RunSummary,
    ) -> Result<bool> {
        let project = region.project_name.as_str();
        let tiles = match self.discover(&region.directory_url) {
            Ok((directory, tiles)) => {
                info!(project, url = %directory, matches = tiles.len(), "Listed project directory");
                tiles
            }
            Err(e @ RunnerError::ListingTooLarge { .. }) => {
                warn!(project, error = %e, "Listing looks malformed; skipping region");
                summary.regions_skipped += 1;
                return Ok(true);
            }
            Err(e) if e.is_download_failure() => {
                error!(project, error = %e, "Could not reach project directory; skipping region");
                summary.regions_skipped += 1;
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        let mut pending = Vec::with_capacity(tiles.len());
        for tile in tiles {
            if index.contains(&tile.mirror_url) {
                summary.tiles_already_indexed += 1;
            } else if self.exclusions.contains(project, &tile.file_name) {
                debug!(project, file = %tile.file_name, "Tile excluded");
                summary.tiles_excluded += 1;
            } else {
                pending.push(tile);
            }
        }
        if pending.is_empty() {
            return Ok(true);
        }
        info!(project, tiles = pending.len(), "Retrieving tiles");

        let mut progress = RegionProgress {
            region,
            attempted: 0,
            checkpoint: CheckpointPolicy::new(&self.config.checkpoint),
        };

        if self.config.workers <= 1 {
            let slot = scratch.slot(0)?;
            for tile in pending {
                if self.stop_requested() {
                    return Ok(false);
                }
                let result = self.fetch_footprint(&slot, &tile);
                self.record(index, &mut progress, summary, tile, result)?;
            }
            Ok(true)
        } else {
            self.process_parallel(pending, index, scratch, &mut progress, summary)
        }
    }

    fn process_parallel(
        &self,
        pending: Vec<TileLink>,
        index: &mut CoverageIndex,
        scratch: &ScratchDir,
        progress: &mut RegionProgress<'_>,
        summary: &mut RunSummary,
    ) -> Result<bool> {
        let workers = self.config.workers;
        let capacity = workers * 2;

        std::thread::scope(|s| -> Result<bool> {
            // Both channels live inside the scope so an early return closes
            // them before the workers are joined
            let (job_tx, job_rx) = bounded::<TileLink>(capacity);
            let (result_tx, result_rx) = unbounded::<(TileLink, Result<Footprint>)>();
            for w in 0..workers {
                let slot = scratch.slot(w)?;
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                s.spawn(move || {
                    for tile in jobs {
                        let result = self.fetch_footprint(&slot, &tile);
                        if results.send((tile, result)).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            let mut queue = pending.into_iter();
            let mut in_flight = 0usize;
            let outcome = loop {
                // The job channel holds `capacity`, so this never blocks
                while in_flight < capacity && !self.stop_requested() {
                    match queue.next() {
                        Some(tile) => {
                            job_tx
                                .send(tile)
                                .map_err(|_| RunnerError::WorkerPool("all workers exited".into()))?;
                            in_flight += 1;
                        }
                        None => break,
                    }
                }
                if in_flight == 0 {
                    break Ok(true);
                }

                let (tile, result) = match result_rx.recv() {
                    Ok(r) => r,
                    Err(_) => break Err(RunnerError::WorkerPool("result channel closed".into())),
                };
                in_flight -= 1;
                if let Err(e) = self.record(index, progress, summary, tile, result) {
                    break Err(e);
                }
            };

            let unfinished = self.stop_requested() && queue.next().is_some();
            // Closing the job channel lets the workers exit
            drop(job_tx);
            outcome.map(|done| done && !unfinished)
        })
    }

    /// Download one tile into `slot` and derive its footprint. The slot is
    /// emptied afterwards, whatever the outcome.
    ///
    /// A panic in the fetcher or extractor is caught and reported as an error
    /// for this tile, so a worker never dies with a job outstanding.
    fn fetch_footprint(&self, slot: &ScratchSlot, tile: &TileLink) -> Result<Footprint> {
        let dest = slot.path_for(&tile.file_name);
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.fetcher.download(&tile.mirror_url, &dest).and_then(|bytes| {
                debug!(file = %tile.file_name, bytes, "Downloaded tile");
                self.extractor.extract(&dest).map_err(RunnerError::from)
            })
        }))
        .unwrap_or_else(|payload| {
            Err(RunnerError::TilePanicked {
                file: tile.file_name.clone(),
                message: panic_message(payload.as_ref()),
            })
        });
        if let Err(e) = slot.clear() {
            warn!(dir = %slot.dir().display(), error = %e, "Could not clear scratch slot");
        }
        result
    }

    /// Writer-side handling of one attempted tile.
    fn record(
        &self,
        index: &mut CoverageIndex,
        progress: &mut RegionProgress<'_>,
        summary: &mut RunSummary,
        tile: TileLink,
        result: Result<Footprint>,
    ) -> Result<()> {
        let project = progress.region.project_name.as_str();
        match result {
            Ok(footprint) => {
                for warning in &footprint.warnings {
                    warn!(project, file = %tile.file_name, "{}", warning);
                }
                let record = IndexRecord::new(project, tile.primary_url, tile.mirror_url, &footprint.polygon);
                match index.append(record)? {
                    AppendOutcome::Appended => {
                        summary.tiles_indexed += 1;
                        info!(
                            project,
                            file = %tile.file_name,
                            ordinal = tile.ordinal,
                            vertices = footprint.stats.simplified_vertices,
                            valid_pct = %format!("{:.1}", footprint.stats.valid_fraction * 100.0),
                            "Indexed tile"
                        );
                    }
                    AppendOutcome::Duplicate => summary.tiles_already_indexed += 1,
                }
            }
            Err(e) if e.is_download_failure() => {
                error!(project, file = %tile.file_name, url = %tile.mirror_url, error = %e, "Download failed; skipping tile");
                summary.downloads_failed += 1;
            }
            Err(e) => {
                error!(project, file = %tile.file_name, error = %e, "Footprint extraction failed; skipping tile");
                summary.footprints_failed += 1;
            }
        }

        progress.attempted += 1;
        let now = Instant::now();
        if progress.checkpoint.is_due(progress.attempted, now) {
            index.snapshot(&self.config.output.backup_dir, project, progress.attempted)?;
            progress.checkpoint.mark(now);
            summary.checkpoints += 1;
        }
        Ok(())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
