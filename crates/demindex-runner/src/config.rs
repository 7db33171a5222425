//! Run configuration, loaded from YAML.
//!
//! Every field has a default, so an empty file (or no file) gives the same
//! layout the indexer has always used:
//!
//! ```yaml
//! input:
//!   path: ./indices/FESM_1m_IL_MO_TN.shp
//!   project_field: project
//!   link_field: product_li
//! output:
//!   dir: output
//!   file_name: 1m_usgs_dem_coverage.shp
//!   backup_dir: zips
//! scratch_dir: tempData
//! workers: 1
//! ```

use crate::exclusions::Exclusion;
use crate::rules::{MirrorRewrite, RewriteChain, UrlRule};
use crate::{Result, RunnerError};
use demindex_index::{DEFAULT_LINK_FIELD, DEFAULT_PROJECT_FIELD};
use demindex_raster::FootprintConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Input coverage layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// Coverage shapefile; attributes come from the matching `.dbf`.
    pub path: PathBuf,
    /// Field holding the project name.
    pub project_field: String,
    /// Field holding the project directory link.
    pub link_field: String,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./indices/FESM_1m_IL_MO_TN.shp"),
            project_field: DEFAULT_PROJECT_FIELD.to_string(),
            link_field: DEFAULT_LINK_FIELD.to_string(),
        }
    }
}

/// Output index and backups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory holding the index.
    pub dir: PathBuf,
    /// Index file name, must end in `.shp`.
    pub file_name: String,
    /// Directory receiving `bak_*.zip` bundles.
    pub backup_dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output"),
            file_name: "1m_usgs_dem_coverage.shp".to_string(),
            backup_dir: PathBuf::from("zips"),
        }
    }
}

/// HTTP client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Whole-request timeout. 1 m tiles are several hundred MB.
    pub timeout_secs: u64,
    /// Connection timeout.
    pub connect_timeout_secs: u64,
    /// User-Agent header.
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 900,
            connect_timeout_secs: 30,
            user_agent: format!("demindex/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Directory listing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingConfig {
    /// Pattern matching tile file names in the listing page.
    pub pattern: String,
    /// Listings with more distinct matches than this are skipped.
    pub max_matches: usize,
}

impl Default for ListingConfig {
    fn default() -> Self {
        Self {
            pattern: "USGS.*?tif".to_string(),
            max_matches: 50_000,
        }
    }
}

/// Link rewriting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Base rules, applied first.
    pub rules: RewriteChain,
    /// Site-specific rules appended after the base rules.
    pub extra_rules: Vec<UrlRule>,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            rules: RewriteChain::usgs_default(),
            extra_rules: Vec::new(),
        }
    }
}

impl RewriteConfig {
    /// The full chain: base rules, then extras.
    pub fn chain(&self) -> RewriteChain {
        let mut chain = self.rules.clone();
        for rule in &self.extra_rules {
            chain.push(rule.clone());
        }
        chain
    }
}

/// When to write backup bundles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Bundle after every this many attempted tiles in a region.
    pub every_tiles: usize,
    /// Also bundle when this many seconds passed since the last bundle.
    pub every_secs: Option<u64>,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            every_tiles: 10,
            every_secs: None,
        }
    }
}

/// Complete indexer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    pub input: InputConfig,
    pub output: OutputConfig,
    /// Download directory, emptied at start and after every tile.
    pub scratch_dir: PathBuf,
    pub http: HttpConfig,
    pub listing: ListingConfig,
    pub rewrite: RewriteConfig,
    pub mirror: MirrorRewrite,
    /// Tiles never downloaded.
    pub exclusions: Vec<Exclusion>,
    pub checkpoint: CheckpointConfig,
    pub footprint: FootprintConfig,
    /// Tiles processed concurrently within a region.
    pub workers: usize,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            input: InputConfig::default(),
            output: OutputConfig::default(),
            scratch_dir: PathBuf::from("tempData"),
            http: HttpConfig::default(),
            listing: ListingConfig::default(),
            rewrite: RewriteConfig::default(),
            mirror: MirrorRewrite::default(),
            exclusions: Vec::new(),
            checkpoint: CheckpointConfig::default(),
            footprint: FootprintConfig::default(),
            workers: 1,
        }
    }
}

impl IndexerConfig {
    /// Load and validate a YAML configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate YAML configuration.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        // An empty document deserializes to null rather than an empty map
        let config: IndexerConfig = if yaml.trim().is_empty() {
            IndexerConfig::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Check settings that would otherwise fail mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(RunnerError::Config("workers must be at least 1".into()));
        }
        if self.checkpoint.every_tiles == 0 {
            return Err(RunnerError::Config("checkpoint.every_tiles must be at least 1".into()));
        }
        if self.checkpoint.every_secs == Some(0) {
            return Err(RunnerError::Config("checkpoint.every_secs must be positive".into()));
        }
        if !self.output.file_name.ends_with(".shp") || self.output.file_name.len() <= 4 {
            return Err(RunnerError::Config(format!(
                "output.file_name must be a .shp name, got {:?}",
                self.output.file_name
            )));
        }
        if self.listing.max_matches == 0 {
            return Err(RunnerError::Config("listing.max_matches must be positive".into()));
        }
        regex::Regex::new(&self.listing.pattern)?;
        let tolerance = self.footprint.simplify_tolerance_px;
        if tolerance.is_nan() || tolerance < 0.0 {
            return Err(RunnerError::Config("footprint.simplify_tolerance_px must be >= 0".into()));
        }
        if self.http.timeout_secs == 0 {
            return Err(RunnerError::Config("http.timeout_secs must be positive".into()));
        }
        Ok(())
    }
}
