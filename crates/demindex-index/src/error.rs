//! Error types for the index crate.

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur reading the coverage layer or maintaining the index.
#[derive(Debug, Error)]
pub enum IndexError {
    /// I/O error on an index or coverage file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The output directory could not be created.
    #[error("Cannot create output directory {path}: {source}")]
    OutputDir {
        /// Directory that was requested.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Shapefile read or write error.
    #[error("Shapefile error: {0}")]
    Shapefile(#[from] shapefile::Error),

    /// dBASE attribute table error.
    #[error("dBASE error: {0}")]
    Dbase(#[from] shapefile::dbase::Error),

    /// Journal line could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backup bundle could not be written.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The coverage layer lacks fields the run depends on.
    #[error("Coverage layer {path} is missing required field(s) {missing:?} (available: {available:?})")]
    MissingFields {
        /// Coverage layer path.
        path: PathBuf,
        /// Required fields that were not found.
        missing: Vec<String>,
        /// Fields the layer does have.
        available: Vec<String>,
    },

    /// A journal line before the last one is unreadable.
    #[error("Journal {path} is corrupt at line {line}")]
    CorruptJournal {
        /// Journal path.
        path: PathBuf,
        /// 1-based line number.
        line: usize,
    },

    /// The index file name is not a usable `.shp` name.
    #[error("Invalid index name: {0}")]
    InvalidName(String),

    /// The attribute schema could not be built.
    #[error("Schema error: {0}")]
    Schema(String),
}
