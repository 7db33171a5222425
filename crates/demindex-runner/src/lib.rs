//! # demindex-runner
//!
//! Crawls USGS staged-product directories and builds a per-tile coverage
//! index of 1 m DEM GeoTIFFs.
//!
//! The input is a coarse coverage layer with one polygon per survey project.
//! For each project the runner resolves the project's `TIFF` directory on the
//! USGS catalog service, lists its tiles, downloads every tile that is not yet
//! indexed from the S3 mirror, derives the tile's valid-data footprint and
//! appends it to the output index. Runs are resumable: tiles already in the
//! index are never downloaded again.
//!
//! ## Modules
//!
//! - [`config`]: YAML configuration with defaults for every setting.
//! - [`rules`]: link rewriting (coverage link to directory, primary to mirror).
//! - [`listing`]: tile names from a directory listing page.
//! - [`fetch`]: the [`Fetcher`] trait and its blocking HTTP implementation.
//! - [`builder`]: the region/tile loop and worker pool.

pub mod builder;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod exclusions;
pub mod fetch;
pub mod listing;
pub mod rules;
pub mod scratch;

pub use builder::{IndexBuilder, RunSummary};
pub use checkpoint::CheckpointPolicy;
pub use config::{
    CheckpointConfig, HttpConfig, IndexerConfig, InputConfig, ListingConfig, OutputConfig, RewriteConfig,
};
pub use error::RunnerError;
pub use exclusions::{Exclusion, ExclusionSet};
pub use fetch::{Fetcher, HttpFetcher};
pub use listing::{TileLink, TileLister};
pub use rules::{MirrorRewrite, RewriteChain, UrlRule};
pub use scratch::{ScratchDir, ScratchSlot};

/// Result type for runner operations.
pub type Result<T> = std::result::Result<T, RunnerError>;
