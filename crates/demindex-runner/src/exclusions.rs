//! Tiles that must never be downloaded.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// A single excluded tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exclusion {
    /// Project the tile belongs to.
    pub project: String,
    /// Tile file name as listed.
    pub file_name: String,
}

/// Set of excluded `(project, file_name)` pairs.
#[derive(Debug, Clone, Default)]
pub struct ExclusionSet {
    by_project: HashMap<String, HashSet<String>>,
}

impl ExclusionSet {
    /// Build from configured exclusions.
    pub fn new<'a>(entries: impl IntoIterator<Item = &'a Exclusion>) -> Self {
        let mut by_project: HashMap<String, HashSet<String>> = HashMap::new();
        for e in entries {
            by_project
                .entry(e.project.clone())
                .or_default()
                .insert(e.file_name.clone());
        }
        Self { by_project }
    }

    /// Whether `file_name` in `project` is excluded.
    pub fn contains(&self, project: &str, file_name: &str) -> bool {
        self.by_project
            .get(project)
            .is_some_and(|files| files.contains(file_name))
    }

    /// Number of excluded tiles across all projects.
    pub fn len(&self) -> usize {
        self.by_project.values().map(HashSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.by_project.is_empty()
    }
}
