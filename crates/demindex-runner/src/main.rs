//! `demindex` command line.

use clap::{Parser, Subcommand};
use demindex_index::{project_counts, CoverageIndex};
use demindex_raster::MaskFootprinter;
use demindex_runner::{HttpFetcher, IndexBuilder, IndexerConfig, Result, RunSummary};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "demindex",
    version,
    about = "Build a per-tile coverage index of USGS 1 m DEM GeoTIFFs"
)]
struct Cli {
    /// Log level used when RUST_LOG is not set.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Crawl every project of the coverage layer and index its tiles.
    Build {
        /// YAML configuration file. Defaults apply when omitted.
        #[arg(short, long, env = "DEMINDEX_CONFIG")]
        config: Option<PathBuf>,

        /// Coverage shapefile, overrides `input.path`.
        #[arg(long)]
        input: Option<PathBuf>,

        /// Output directory, overrides `output.dir`.
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Backup directory, overrides `output.backup_dir`.
        #[arg(long)]
        backup_dir: Option<PathBuf>,

        /// Scratch directory, overrides `scratch_dir`.
        #[arg(long)]
        scratch_dir: Option<PathBuf>,

        /// Concurrent tile workers, overrides `workers`.
        #[arg(short, long)]
        workers: Option<usize>,
    },

    /// Show the directory a coverage link resolves to.
    Resolve {
        /// Link as stored in the coverage layer.
        link: String,

        /// Also fetch the directory and list its tiles.
        #[arg(long, default_value_t = false)]
        list: bool,

        #[arg(short, long, env = "DEMINDEX_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Summarise an existing index.
    Stats {
        #[arg(short, long, env = "DEMINDEX_CONFIG")]
        config: Option<PathBuf>,

        /// Output directory, overrides `output.dir`.
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
}

fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(path: Option<&PathBuf>) -> Result<IndexerConfig> {
    match path {
        Some(path) => IndexerConfig::from_file(path),
        None => Ok(IndexerConfig::default()),
    }
}

fn print_summary(summary: &RunSummary) {
    println!("Regions processed:     {}", summary.regions_processed);
    println!("  skipped:             {}", summary.regions_skipped);
    println!("Tiles indexed:         {}", summary.tiles_indexed);
    println!("  already indexed:     {}", summary.tiles_already_indexed);
    println!("  excluded:            {}", summary.tiles_excluded);
    println!("  download failures:   {}", summary.downloads_failed);
    println!("  footprint failures:  {}", summary.footprints_failed);
    println!("Backup bundles:        {}", summary.checkpoints);
    println!("Elapsed:               {:.1}s", summary.elapsed.as_secs_f64());
    if summary.interrupted {
        println!("Run interrupted before completion");
    }
    if let Some(reason) = &summary.aborted {
        println!("Run aborted: {}", reason);
    }
}

fn run(cli: Cli) -> Result<ExitCode> {
    match cli.command {
        Command::Build {
            config,
            input,
            output_dir,
            backup_dir,
            scratch_dir,
            workers,
        } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(input) = input {
                config.input.path = input;
            }
            if let Some(dir) = output_dir {
                config.output.dir = dir;
            }
            if let Some(dir) = backup_dir {
                config.output.backup_dir = dir;
            }
            if let Some(dir) = scratch_dir {
                config.scratch_dir = dir;
            }
            if let Some(workers) = workers {
                config.workers = workers;
            }

            let stop = Arc::new(AtomicBool::new(false));
            let handler_flag = Arc::clone(&stop);
            if let Err(e) = ctrlc::set_handler(move || {
                if handler_flag.swap(true, Ordering::SeqCst) {
                    // Second interrupt: give up immediately
                    std::process::exit(130);
                }
                eprintln!("Interrupt received; finishing tiles in flight (press again to abort)");
            }) {
                warn!(error = %e, "Could not install interrupt handler");
            }

            let fetcher = HttpFetcher::new(&config.http)?;
            let extractor = MaskFootprinter::new(config.footprint.clone());
            let builder = IndexBuilder::new(config, Box::new(fetcher), Box::new(extractor))?.with_stop_flag(stop);
            let summary = builder.run()?;
            print_summary(&summary);
            println!("Processed {} regions", summary.regions_processed);

            Ok(if summary.aborted.is_some() {
                ExitCode::FAILURE
            } else if summary.interrupted {
                ExitCode::from(130)
            } else {
                ExitCode::SUCCESS
            })
        }

        Command::Resolve { link, list, config } => {
            let config = load_config(config.as_ref())?;
            if !list {
                println!("{}", config.rewrite.chain().resolve(&link));
                return Ok(ExitCode::SUCCESS);
            }

            let fetcher = HttpFetcher::new(&config.http)?;
            let extractor = MaskFootprinter::new(config.footprint.clone());
            let builder = IndexBuilder::new(config, Box::new(fetcher), Box::new(extractor))?;
            let (directory, tiles) = builder.discover(&link)?;
            println!("{}", directory);
            for tile in &tiles {
                println!("{:>6}  {}", tile.ordinal, tile.mirror_url);
            }
            println!("{} tiles", tiles.len());
            Ok(ExitCode::SUCCESS)
        }

        Command::Stats { config, output_dir } => {
            let mut config = load_config(config.as_ref())?;
            if let Some(dir) = output_dir {
                config.output.dir = dir;
            }
            let records = CoverageIndex::read_records(&config.output.dir, &config.output.file_name)?;
            let counts = project_counts(&records);
            for (project, count) in &counts {
                println!("{:>8}  {}", count, project);
            }
            println!("{} tiles in {} projects", records.len(), counts.len());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "demindex failed");
            ExitCode::FAILURE
        }
    }
}
