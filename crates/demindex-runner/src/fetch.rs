//! HTTP access to directory listings and tile downloads.

use crate::config::HttpConfig;
use crate::{Result, RunnerError};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::Path;
use std::time::Duration;

/// Remote access used by the index builder.
///
/// Implementations are shared by all workers.
pub trait Fetcher: Send + Sync {
    /// GET `url` and return the body as text.
    fn get_text(&self, url: &str) -> Result<String>;

    /// GET `url` and stream the body into `dest`. Returns the byte count.
    ///
    /// On failure `dest` must not be left behind as a partial file.
    fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

/// Blocking `reqwest` implementation of [`Fetcher`].
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher").finish()
    }
}

impl HttpFetcher {
    /// Build a client with the configured timeouts and user agent.
    pub fn new(config: &HttpConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        let response = self.client.get(url).send()?;
        if !response.status().is_success() {
            return Err(RunnerError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(response)
    }
}

impl Fetcher for HttpFetcher {
    fn get_text(&self, url: &str) -> Result<String> {
        Ok(self.get(url)?.text()?)
    }

    fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.get(url)?;
        let result = File::create(dest)
            .map_err(|source| RunnerError::Download {
                url: url.to_string(),
                source,
            })
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                let bytes = response.copy_to(&mut writer)?;
                writer
                    .into_inner()
                    .map_err(|e| e.into_error())
                    .and_then(|file| file.sync_all())
                    .map_err(|source| RunnerError::Download {
                        url: url.to_string(),
                        source,
                    })?;
                Ok(bytes)
            });
        if result.is_err() {
            let _ = fs::remove_file(dest);
        }
        result
    }
}
