//! Scratch directory for downloaded tiles.
//!
//! Each worker owns one slot (`worker-N`) so concurrent downloads never
//! share files. Slots are emptied after every tile; the whole directory is
//! emptied when a run starts, removing anything an interrupted run left.

use crate::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Root of the per-worker scratch slots.
#[derive(Debug, Clone)]
pub struct ScratchDir {
    root: PathBuf,
}

impl ScratchDir {
    /// Create `root` if needed and remove everything in it.
    pub fn prepare<P: AsRef<Path>>(root: P) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        let removed = clear_dir(&root)?;
        if removed > 0 {
            debug!(dir = %root.display(), removed, "Cleared leftover scratch files");
        }
        Ok(Self { root })
    }

    /// The slot for worker `index`, created on demand.
    pub fn slot(&self, index: usize) -> Result<ScratchSlot> {
        let dir = self.root.join(format!("worker-{}", index));
        fs::create_dir_all(&dir)?;
        Ok(ScratchSlot { dir })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// One worker's download area.
#[derive(Debug, Clone)]
pub struct ScratchSlot {
    dir: PathBuf,
}

impl ScratchSlot {
    /// Download target for a listed file. Only the final path component of
    /// `file_name` is used.
    pub fn path_for(&self, file_name: &str) -> PathBuf {
        let name = file_name
            .rsplit(['/', '\\'])
            .find(|s| !s.is_empty() && *s != "..")
            .unwrap_or("tile.tif");
        self.dir.join(name)
    }

    /// Remove every file in the slot.
    pub fn clear(&self) -> Result<()> {
        clear_dir(&self.dir)?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

fn clear_dir(dir: &Path) -> Result<usize> {
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed += 1;
    }
    Ok(removed)
}
