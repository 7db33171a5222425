//! Error types for the runner.

use demindex_index::IndexError;
use demindex_raster::RasterError;
use thiserror::Error;

/// Errors that can occur while building the coverage index.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// I/O error on the scratch or backup directories.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Configuration is invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Listing pattern does not compile.
    #[error("Invalid listing pattern: {0}")]
    Pattern(#[from] regex::Error),

    /// Coverage layer or output index error.
    #[error(transparent)]
    Index(#[from] IndexError),

    /// Footprint extraction failed.
    #[error("Footprint error: {0}")]
    Raster(#[from] RasterError),

    /// Transport-level HTTP failure.
    #[error("HTTP request error: {0}")]
    HttpRequest(#[from] reqwest::Error),

    /// Server answered with a non-success status.
    #[error("HTTP {status} from {url}")]
    HttpStatus {
        /// Requested URL.
        url: String,
        /// Response status code.
        status: u16,
    },

    /// Directory listing produced implausibly many tile names.
    #[error("Listing of {url} has {count} matches (limit {max})")]
    ListingTooLarge {
        /// Listing URL.
        url: String,
        /// De-duplicated match count.
        count: usize,
        /// Configured limit.
        max: usize,
    },

    /// Writing a downloaded body to the scratch directory failed.
    #[error("Download of {url} failed: {source}")]
    Download {
        /// Requested URL.
        url: String,
        /// Local write error.
        source: std::io::Error,
    },

    /// Downloading or extracting one tile panicked.
    #[error("Processing {file} panicked: {message}")]
    TilePanicked {
        /// Tile file name.
        file: String,
        /// Panic payload, when it was a string.
        message: String,
    },

    /// A worker thread exited without reporting its result.
    #[error("Worker pool failed: {0}")]
    WorkerPool(String),
}

impl RunnerError {
    /// Whether this error came from fetching a remote resource.
    pub fn is_download_failure(&self) -> bool {
        matches!(
            self,
            RunnerError::HttpRequest(_) | RunnerError::HttpStatus { .. } | RunnerError::Download { .. }
        )
    }
}
