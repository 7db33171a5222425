//! Zip backup bundles of the output directory.

use crate::Result;
use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// File name of a checkpoint bundle: `bak_{project}_{count}.zip`.
///
/// Path separators in the project name are replaced so the bundle always
/// lands directly in the backup directory.
pub fn bundle_name(project: &str, count: usize) -> String {
    let safe: String = project
        .chars()
        .map(|c| if matches!(c, '/' | '\\' | ':') { '_' } else { c })
        .collect();
    format!("bak_{}_{}.zip", safe, count)
}

fn is_bundled(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };
    let earlier_bundle = name.starts_with("bak_") && (name.ends_with(".zip") || name.ends_with(".partial"));
    path.is_file() && !name.ends_with(".lock") && !name.contains(".tmp.") && !earlier_bundle
}

/// Zip the regular files of `source_dir` into `dest_dir/name`.
///
/// Lock files and in-progress temporaries are left out. The archive is
/// written under a temporary name and renamed, so a bundle either exists
/// complete or not at all.
pub fn write_bundle(source_dir: &Path, dest_dir: &Path, name: &str) -> Result<PathBuf> {
    fs::create_dir_all(dest_dir)?;
    let final_path = dest_dir.join(name);
    let tmp_path = dest_dir.join(format!("{}.partial", name));

    let mut entries: Vec<PathBuf> = fs::read_dir(source_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| is_bundled(p))
        .collect();
    entries.sort();

    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    let mut zip = ZipWriter::new(File::create(&tmp_path)?);
    for path in &entries {
        let entry_name = match path.file_name().and_then(|n| n.to_str()) {
            Some(n) => n.to_string(),
            None => continue,
        };
        zip.start_file(entry_name, options)?;
        let mut reader = BufReader::new(File::open(path)?);
        io::copy(&mut reader, &mut zip)?;
    }
    let file = zip.finish()?;
    file.sync_all()?;
    drop(file);

    fs::rename(&tmp_path, &final_path)?;
    info!(bundle = %final_path.display(), files = entries.len(), "Wrote backup bundle");
    Ok(final_path)
}
