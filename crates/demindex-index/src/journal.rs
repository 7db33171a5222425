//! Append-only JSON Lines journal of index records.
//!
//! The journal is the durable record of the index: every append is written as
//! one line and synced before it is acknowledged. The shapefile is rebuilt
//! from it. A crash mid-append can only leave a partial last line, which is
//! dropped on the next open.

use crate::schema::IndexRecord;
use crate::{IndexError, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Durable append-only record log.
#[derive(Debug)]
pub struct Journal {
    path: PathBuf,
    file: File,
}

impl Journal {
    /// Open (or create) the journal and replay its records.
    ///
    /// A torn trailing line is truncated away. Unreadable lines before the
    /// last one are an error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<(Self, Vec<IndexRecord>)> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let (records, good_len) = Self::replay(&path, &mut file)?;
        let total_len = file.metadata()?.len();
        if good_len < total_len {
            warn!(
                journal = %path.display(),
                dropped_bytes = total_len - good_len,
                "Discarding incomplete trailing journal entry"
            );
            file.set_len(good_len)?;
            file.sync_all()?;
        }

        Ok((Self { path, file }, records))
    }

    /// Replay a journal without opening it for writing. A torn tail is ignored
    /// but left in place.
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Vec<IndexRecord>> {
        let path = path.as_ref();
        let mut file = File::open(path)?;
        Ok(Self::replay(path, &mut file)?.0)
    }

    /// Read all complete records; returns them with the byte length they span.
    fn replay(path: &Path, file: &mut File) -> Result<(Vec<IndexRecord>, u64)> {
        file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&*file);
        let mut records = Vec::new();
        let mut buf = Vec::new();
        let mut good_len = 0u64;
        let mut line = 0usize;

        loop {
            buf.clear();
            let n = reader.read_until(b'\n', &mut buf)?;
            if n == 0 {
                break;
            }
            line += 1;

            let complete = buf.last() == Some(&b'\n');
            let parsed = std::str::from_utf8(&buf).ok().map(str::trim).and_then(|text| {
                if text.is_empty() {
                    Some(None)
                } else {
                    serde_json::from_str::<IndexRecord>(text).ok().map(Some)
                }
            });

            match (parsed, complete) {
                (Some(record), true) => {
                    records.extend(record);
                    good_len += n as u64;
                }
                _ => {
                    // Only the final line may be damaged
                    buf.clear();
                    if reader.read_until(b'\n', &mut buf)? > 0 {
                        return Err(IndexError::CorruptJournal {
                            path: path.to_path_buf(),
                            line,
                        });
                    }
                    break;
                }
            }
        }

        Ok((records, good_len))
    }

    /// Append one record and sync it to disk.
    pub fn append(&mut self, record: &IndexRecord) -> Result<()> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Journal file path.
    pub fn path(&self) -> &Path {
        &self.path
    }
}
