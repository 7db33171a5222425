//! Tile discovery in a project directory listing.

use crate::config::ListingConfig;
use crate::rules::MirrorRewrite;
use crate::{Result, RunnerError};
use regex::Regex;
use std::collections::HashSet;

/// One GeoTIFF found in a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileLink {
    /// File name as it appears in the listing.
    pub file_name: String,
    /// Catalog service URL, kept for provenance.
    pub primary_url: String,
    /// Object-storage URL; downloaded, and the index key.
    pub mirror_url: String,
    /// 1-based position in the de-duplicated listing.
    pub ordinal: usize,
}

/// Scans listing pages for tile names.
#[derive(Debug, Clone)]
pub struct TileLister {
    pattern: Regex,
    max_matches: usize,
    mirror: MirrorRewrite,
}

impl TileLister {
    /// Build a lister from the listing settings.
    pub fn new(config: &ListingConfig, mirror: MirrorRewrite) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(&config.pattern)?,
            max_matches: config.max_matches,
            mirror,
        })
    }

    /// Distinct matches of the pattern in `body`, in first-seen order.
    ///
    /// Listings link every file more than once (anchor and text), so
    /// duplicates are expected.
    pub fn distinct_matches<'a>(&self, body: &'a str) -> Vec<&'a str> {
        let mut seen = HashSet::new();
        self.pattern
            .find_iter(body)
            .map(|m| m.as_str())
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Turn the listing `body` of `directory_url` into tile links.
    ///
    /// More than `max_matches` distinct names means the page was not a normal
    /// listing; that is reported as [`RunnerError::ListingTooLarge`].
    pub fn parse(&self, directory_url: &str, body: &str) -> Result<Vec<TileLink>> {
        let names = self.distinct_matches(body);
        if names.len() > self.max_matches {
            return Err(RunnerError::ListingTooLarge {
                url: directory_url.to_string(),
                count: names.len(),
                max: self.max_matches,
            });
        }

        let base = directory_url.trim_end_matches('/');
        Ok(names
            .into_iter()
            .enumerate()
            .map(|(i, name)| {
                let primary_url = format!("{}/{}", base, name);
                TileLink {
                    file_name: name.to_string(),
                    mirror_url: self.mirror.mirror_url(&primary_url),
                    primary_url,
                    ordinal: i + 1,
                }
            })
            .collect())
    }
}
