//! The resumable output index.

use crate::backup::{bundle_name, write_bundle};
use crate::journal::Journal;
use crate::schema::{clamp_text, IndexRecord, DBF_MAX_CHAR_WIDTH};
use crate::shapefile_io::{read_index_shapefile, write_index_shapefile, write_prj};
use crate::{IndexError, Result};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Outcome of [`CoverageIndex::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The record was written.
    Appended,
    /// A record with the same mirror link already exists; nothing was written.
    Duplicate,
}

/// Polygon index of downloaded tiles, keyed by mirror link.
///
/// Records go to the journal first; the shapefile is regenerated from the
/// journal by [`CoverageIndex::materialize`].
#[derive(Debug)]
pub struct CoverageIndex {
    dir: PathBuf,
    shp_path: PathBuf,
    journal: Journal,
    records: Vec<IndexRecord>,
    seen: HashSet<String>,
    /// Adopted links that fill the whole DBF field and may have been cut.
    truncated: HashSet<String>,
    dirty: bool,
}

impl CoverageIndex {
    /// Open the index `file_name` in `dir`, creating both if needed.
    ///
    /// An existing index is resumed: the journal is replayed and records
    /// found only in the shapefile are adopted into the journal.
    pub fn open_or_create<P: AsRef<Path>>(dir: P, file_name: &str) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| IndexError::OutputDir {
            path: dir.clone(),
            source,
        })?;

        let shp_path = dir.join(file_name);
        let journal_path = journal_path_for(&shp_path)?;

        let existed = shp_path.exists();
        let (journal, records) = Journal::open(&journal_path)?;
        let seen = records.iter().map(|r| r.linkaws.clone()).collect();
        // Adopted in an earlier run
        let truncated = records
            .iter()
            .filter(|r| fills_dbf_field(&r.linkaws))
            .map(|r| r.linkaws.clone())
            .collect();

        let mut index = Self {
            dir,
            shp_path,
            journal,
            records,
            seen,
            truncated,
            dirty: !existed,
        };

        if existed {
            let adopted = index.adopt_shapefile_records()?;
            if adopted > 0 {
                info!(adopted, "Adopted shapefile records missing from the journal");
            }
        }
        if !index.shp_path.with_extension("prj").exists() {
            write_prj(&index.shp_path)?;
        }
        index.materialize()?;

        info!(
            path = %index.shp_path.display(),
            journal = %index.journal.path().display(),
            records = index.records.len(),
            resumed = existed,
            "Opened coverage index"
        );
        Ok(index)
    }

    /// Load the records of an existing index without modifying it.
    ///
    /// Reads the journal when there is one, otherwise the shapefile.
    pub fn read_records<P: AsRef<Path>>(dir: P, file_name: &str) -> Result<Vec<IndexRecord>> {
        let shp_path = dir.as_ref().join(file_name);
        let journal_path = journal_path_for(&shp_path)?;
        if journal_path.exists() {
            Journal::read(&journal_path)
        } else {
            read_index_shapefile(&shp_path)
        }
    }

    fn adopt_shapefile_records(&mut self) -> Result<usize> {
        let on_disk = match read_index_shapefile(&self.shp_path) {
            Ok(records) => records,
            Err(e) => {
                warn!(path = %self.shp_path.display(), error = %e, "Existing shapefile unreadable; rebuilding from journal");
                self.dirty = true;
                return Ok(0);
            }
        };

        if on_disk.len() != self.records.len() {
            self.dirty = true;
        }
        // The .dbf holds links cut to the field width
        let clamped: HashSet<String> = self
            .seen
            .iter()
            .map(|l| clamp_text(l, DBF_MAX_CHAR_WIDTH as usize).to_string())
            .collect();
        let mut adopted = 0;
        for record in on_disk {
            if clamped.contains(&record.linkaws) {
                continue;
            }
            let link = record.linkaws.clone();
            if self.append(record)? == AppendOutcome::Appended {
                adopted += 1;
                if fills_dbf_field(&link) {
                    self.truncated.insert(link);
                }
            }
        }
        Ok(adopted)
    }

    /// Whether a tile with this mirror link is already indexed.
    ///
    /// Links longer than the DBF field also match a record adopted from a
    /// shapefile that only kept their first 254 bytes.
    pub fn contains(&self, linkaws: &str) -> bool {
        if self.seen.contains(linkaws) {
            return true;
        }
        linkaws.len() > DBF_MAX_CHAR_WIDTH as usize
            && self
                .truncated
                .contains(clamp_text(linkaws, DBF_MAX_CHAR_WIDTH as usize))
    }

    /// Durably append a record unless its mirror link is already indexed.
    pub fn append(&mut self, record: IndexRecord) -> Result<AppendOutcome> {
        if self.contains(&record.linkaws) {
            return Ok(AppendOutcome::Duplicate);
        }
        self.journal.append(&record)?;
        self.seen.insert(record.linkaws.clone());
        self.records.push(record);
        self.dirty = true;
        Ok(AppendOutcome::Appended)
    }

    /// Number of indexed tiles.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the index has no records.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rewrite the shapefile from the journal if anything changed.
    pub fn materialize(&mut self) -> Result<()> {
        if self.dirty {
            write_index_shapefile(&self.shp_path, &self.records)?;
            self.dirty = false;
        }
        Ok(())
    }

    /// Materialise and write a `bak_{project}_{count}.zip` bundle of the
    /// output directory into `backup_dir`.
    pub fn snapshot(&mut self, backup_dir: &Path, project: &str, count: usize) -> Result<PathBuf> {
        self.materialize()?;
        write_bundle(&self.dir, backup_dir, &bundle_name(project, count))
    }

    /// Shapefile path.
    pub fn shp_path(&self) -> &Path {
        &self.shp_path
    }
}

/// Record count per project of `records`, sorted by project name.
pub fn project_counts(records: &[IndexRecord]) -> BTreeMap<&str, usize> {
    let mut counts = BTreeMap::new();
    for r in records {
        *counts.entry(r.project.as_str()).or_insert(0) += 1;
    }
    counts
}

/// Whether a link read back from the .dbf may have been cut to the field width.
fn fills_dbf_field(link: &str) -> bool {
    link.len() == DBF_MAX_CHAR_WIDTH as usize
}

/// `<stem>.journal.jsonl` next to the `.shp`.
fn journal_path_for(shp_path: &Path) -> Result<PathBuf> {
    let invalid = || IndexError::InvalidName(shp_path.display().to_string());
    let name = shp_path.file_name().and_then(|n| n.to_str()).ok_or_else(invalid)?;
    let stem = name
        .strip_suffix(".shp")
        .filter(|s| !s.is_empty())
        .ok_or_else(invalid)?;
    Ok(shp_path.with_file_name(format!("{}.journal.jsonl", stem)))
}

impl Drop for CoverageIndex {
    fn drop(&mut self) {
        if let Err(e) = self.materialize() {
            warn!(error = %e, "Failed to materialise index on close");
        }
    }
}
