//! # demindex-index
//!
//! Vector I/O for the DEM coverage indexer.
//!
//! - [`CoverageReader`] streams survey projects out of the input coverage
//!   layer's attribute table.
//! - [`CoverageIndex`] is the resumable output: one polygon per downloaded
//!   tile, unique by mirror link (`linkaws`). Appends go to a JSON Lines
//!   journal that is synced per record; the ESRI shapefile with its WGS84
//!   `.prj` is regenerated from the journal.
//! - [`write_bundle`] produces the `bak_{project}_{count}.zip` checkpoint
//!   archives.
//!
//! ## Output layout
//!
//! ```text
//! output/
//!   1m_usgs_dem_coverage.shp/.shx/.dbf/.prj
//!   1m_usgs_dem_coverage.journal.jsonl
//! ```

mod backup;
mod coverage;
mod error;
mod journal;
mod schema;
mod shapefile_io;
mod store;

pub use backup::{bundle_name, write_bundle};
pub use coverage::{CoverageReader, CoverageRegion, DEFAULT_LINK_FIELD, DEFAULT_PROJECT_FIELD};
pub use error::IndexError;
pub use journal::Journal;
pub use schema::{
    IndexRecord, TextField, DBF_MAX_CHAR_WIDTH, FIELD_LINK, FIELD_LINKAWS, FIELD_PROJECT, INDEX_FIELDS,
    WGS84_WKT,
};
pub use shapefile_io::{read_index_shapefile, write_index_shapefile};
pub use store::{project_counts, AppendOutcome, CoverageIndex};

/// Result type for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;
