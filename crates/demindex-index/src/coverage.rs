//! Input coverage layer: one row per survey project.

use crate::{IndexError, Result};
use shapefile::dbase::{self, FieldValue, Record};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default attribute holding the project name.
pub const DEFAULT_PROJECT_FIELD: &str = "project";
/// Default attribute holding the tile directory link.
pub const DEFAULT_LINK_FIELD: &str = "product_li";

/// One survey project from the coverage layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverageRegion {
    /// Project identifier.
    pub project_name: String,
    /// Raw link to the project's remote directory, before rewriting.
    pub directory_url: String,
}

/// Streaming reader over the coverage layer's attribute table.
pub struct CoverageReader {
    path: PathBuf,
    reader: dbase::Reader<BufReader<File>>,
    project_field: String,
    link_field: String,
}

impl std::fmt::Debug for CoverageReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverageReader")
            .field("path", &self.path)
            .field("project_field", &self.project_field)
            .field("link_field", &self.link_field)
            .finish()
    }
}

impl CoverageReader {
    /// Open a coverage layer and check it has the required fields.
    ///
    /// `path` may name the `.shp` or the `.dbf`; attributes are always read
    /// from the `.dbf`. Field names match case-insensitively.
    pub fn open<P: AsRef<Path>>(path: P, project_field: &str, link_field: &str) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let dbf = path.with_extension("dbf");
        let reader = dbase::Reader::from_path(&dbf)?;

        let available: Vec<String> = reader.fields().iter().map(|f| f.name().to_string()).collect();
        let resolve = |wanted: &str| available.iter().find(|n| n.eq_ignore_ascii_case(wanted)).cloned();

        let (project, link) = (resolve(project_field), resolve(link_field));
        let (project_field, link_field) = match (project, link) {
            (Some(p), Some(l)) => (p, l),
            (p, l) => {
                let mut missing = Vec::new();
                if p.is_none() {
                    missing.push(project_field.to_string());
                }
                if l.is_none() {
                    missing.push(link_field.to_string());
                }
                return Err(IndexError::MissingFields {
                    path,
                    missing,
                    available,
                });
            }
        };

        Ok(Self {
            path,
            reader,
            project_field,
            link_field,
        })
    }

    /// Coverage layer path as given.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterate the regions in the layer's record order.
    ///
    /// Rows with an empty project or link are logged and skipped. The
    /// iterator reads records on demand and cannot be restarted.
    pub fn regions(&mut self) -> impl Iterator<Item = Result<CoverageRegion>> + '_ {
        let project_field = self.project_field.clone();
        let link_field = self.link_field.clone();

        self.reader
            .iter_records()
            .enumerate()
            .filter_map(move |(row, record)| match record {
                Err(e) => Some(Err(IndexError::from(e))),
                Ok(record) => {
                    let project_name = text_value(&record, &project_field);
                    let directory_url = text_value(&record, &link_field);
                    if project_name.is_empty() || directory_url.is_empty() {
                        warn!(row, project = %project_name, "Skipping coverage row without project or link");
                        return None;
                    }
                    Some(Ok(CoverageRegion {
                        project_name,
                        directory_url,
                    }))
                }
            })
    }
}

pub(crate) fn text_value(record: &Record, field: &str) -> String {
    match record.get(field) {
        Some(FieldValue::Character(Some(s))) => s.trim().to_string(),
        Some(FieldValue::Memo(s)) => s.trim().to_string(),
        _ => String::new(),
    }
}
