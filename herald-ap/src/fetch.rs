//! Remote content retrieval
//!
//! Files named in a bill may live on a remote server. They are downloaded
//! into the local files directory through a `<name>.download` temporary file
//! that is renamed into place only once complete.

use crate::error::{Error, Result};
use futures::future::BoxFuture;
use herald_common::MusicFile;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Retry and timeout policy for downloads
#[derive(Debug, Clone)]
pub struct FetchPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for FetchPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
        }
    }
}

/// Content fetch capability
pub trait ContentFetch: Send + Sync {
    /// Download `url` to `dest`, retrying per the fetcher's policy
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<()>>;
}

/// reqwest-backed fetcher
pub struct HttpFetcher {
    client: reqwest::Client,
    policy: FetchPolicy,
}

impl HttpFetcher {
    pub fn new(policy: FetchPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(policy.timeout)
            .build()
            .map_err(|e| Error::Fetch(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { client, policy })
    }

    async fn attempt(&self, url: &str, tmp: &Path) -> Result<u64> {
        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::Fetch(format!("GET {} failed: {}", url, e)))?;

        let mut out = tokio::fs::File::create(tmp).await?;
        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::Fetch(format!("reading {} failed: {}", url, e)))?
        {
            out.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        out.flush().await?;
        Ok(written)
    }
}

impl ContentFetch for HttpFetcher {
    fn fetch<'a>(&'a self, url: &'a str, dest: &'a Path) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let tmp = download_path(dest);
            let attempts = self.policy.max_attempts.max(1);
            let mut last_error = None;

            for attempt in 1..=attempts {
                debug!("Downloading {} to {} (attempt {})", url, tmp.display(), attempt);
                match self.attempt(url, &tmp).await {
                    Ok(bytes) => {
                        tokio::fs::rename(&tmp, dest).await?;
                        info!("Downloaded {} ({} bytes) to {}", url, bytes, dest.display());
                        return Ok(());
                    }
                    Err(e) => {
                        warn!("Download attempt {}/{} for {} failed: {}", attempt, attempts, url, e);
                        let _ = tokio::fs::remove_file(&tmp).await;
                        last_error = Some(e);
                        if attempt < attempts {
                            tokio::time::sleep(self.policy.backoff).await;
                        }
                    }
                }
            }

            Err(Error::Fetch(format!(
                "{} failed after {} attempts: {}",
                url,
                attempts,
                last_error.map(|e| e.to_string()).unwrap_or_default()
            )))
        })
    }
}

/// Temporary path a download is written to
pub fn download_path(dest: &Path) -> PathBuf {
    let mut name = dest.as_os_str().to_owned();
    name.push(".download");
    PathBuf::from(name)
}

/// Clears the download flag when dropped
struct DownloadGuard<'a>(&'a MusicFile);

impl Drop for DownloadGuard<'_> {
    fn drop(&mut self) {
        self.0.downloading.release();
    }
}

/// Download a bill file, rejecting a second download of the same file
pub async fn fetch_file(fetcher: &dyn ContentFetch, file: &MusicFile, dest: &Path) -> Result<()> {
    let url = file
        .url()
        .ok_or_else(|| Error::Fetch(format!("file [{}] has no url", file.name)))?;

    if !file.downloading.try_acquire() {
        return Err(Error::Fetch(format!("file [{}] is already downloading", url)));
    }
    let _guard = DownloadGuard(file);

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    fetcher.fetch(url, dest).await
}
