//! URL rewriting: coverage links to listable directories, and catalog
//! service links to their object-storage mirror.
//!
//! The coverage layer's links point at an S3 browser page and predate a
//! rename of project directories from `-` to `_`. The default
//! [`RewriteChain`] turns such a link into the rockyweb directory that lists
//! the project's GeoTIFFs:
//!
//! ```
//! use demindex_runner::RewriteChain;
//!
//! let chain = RewriteChain::usgs_default();
//! assert_eq!(
//!     chain.resolve("http://prd-tnm.s3.amazonaws.com/index.html?prefix=StagedProducts/Elevation/1m/Projects/MO-Test_2018"),
//!     "https://rockyweb.usgs.gov/vdelivery/Datasets/Staged/Elevation/1m/Projects/MO_Test_2018/TIFF",
//! );
//! ```

use serde::{Deserialize, Serialize};

/// S3 browser prefix used by coverage layer links.
pub const S3_INDEX_PREFIX: &str = "http://prd-tnm.s3.amazonaws.com/index.html?prefix=StagedProducts/";
/// Catalog service (rockyweb) staged products root.
pub const ROCKYWEB_PREFIX: &str = "https://rockyweb.usgs.gov/vdelivery/Datasets/Staged/";
/// Object storage staged products root.
pub const S3_MIRROR_PREFIX: &str = "http://prd-tnm.s3.amazonaws.com/StagedProducts/";

/// One pure string rewrite.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UrlRule {
    /// Append `suffix` unless the URL already ends with it.
    AppendSuffix {
        /// Text to append.
        suffix: String,
    },
    /// Replace every occurrence of `from` with `to`.
    Replace {
        /// Text to find.
        from: String,
        /// Replacement.
        to: String,
    },
}

impl UrlRule {
    /// Shorthand for [`UrlRule::Replace`].
    pub fn replace(from: impl Into<String>, to: impl Into<String>) -> Self {
        UrlRule::Replace {
            from: from.into(),
            to: to.into(),
        }
    }

    /// Apply the rule.
    pub fn apply(&self, url: &str) -> String {
        match self {
            UrlRule::AppendSuffix { suffix } => {
                let trimmed = url.trim_end_matches('/');
                if trimmed.ends_with(suffix.as_str()) {
                    trimmed.to_string()
                } else {
                    format!("{}{}", trimmed, suffix)
                }
            }
            UrlRule::Replace { from, to } => {
                if from.is_empty() {
                    url.to_string()
                } else {
                    url.replace(from.as_str(), to)
                }
            }
        }
    }
}

/// Ordered list of rules applied left to right.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RewriteChain {
    rules: Vec<UrlRule>,
}

impl RewriteChain {
    /// Chain from explicit rules.
    pub fn new(rules: Vec<UrlRule>) -> Self {
        Self { rules }
    }

    /// Rules that turn a coverage link into its rockyweb `TIFF` directory.
    pub fn usgs_default() -> Self {
        Self::new(vec![
            UrlRule::AppendSuffix {
                suffix: "/TIFF".to_string(),
            },
            UrlRule::replace(S3_INDEX_PREFIX, ROCKYWEB_PREFIX),
            // Project directories were renamed to underscores
            UrlRule::replace("-", "_"),
            // ...which also hits the S3 host name
            UrlRule::replace("prd_tnm", "prd-tnm"),
        ])
    }

    /// Add a rule at the end.
    pub fn push(&mut self, rule: UrlRule) {
        self.rules.push(rule);
    }

    /// The rules in order.
    pub fn rules(&self) -> &[UrlRule] {
        &self.rules
    }

    /// Run every rule over `link`.
    pub fn resolve(&self, link: &str) -> String {
        self.rules
            .iter()
            .fold(link.trim().to_string(), |url, rule| rule.apply(&url))
    }
}

/// Maps catalog service URLs to the faster object-storage mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MirrorRewrite {
    /// Prefix of primary URLs.
    pub primary_prefix: String,
    /// Prefix that replaces it.
    pub mirror_prefix: String,
}

impl Default for MirrorRewrite {
    fn default() -> Self {
        Self {
            primary_prefix: ROCKYWEB_PREFIX.to_string(),
            mirror_prefix: S3_MIRROR_PREFIX.to_string(),
        }
    }
}

impl MirrorRewrite {
    /// Mirror URL for `primary_url`. URLs outside the primary prefix are
    /// returned unchanged.
    pub fn mirror_url(&self, primary_url: &str) -> String {
        primary_url.replace(self.primary_prefix.as_str(), &self.mirror_prefix)
    }
}
