//! HTTP downloads for the prebuilt toolchain.

use crate::error::{ReleaseError, Result};
use async_trait::async_trait;
use std::path::Path;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Capability for fetching remote files.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download `url` into `dest`, returning the number of bytes written.
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64>;

    /// Download `url` as text.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// [`Downloader`] backed by `reqwest`.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("ybtp/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(ReleaseError::Download {
                url: url.to_string(),
                message: format!("HTTP {}", response.status()),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<u64> {
        info!(url = %url, dest = %dest.display(), "Downloading");

        let mut response = self.get(url).await?;
        let mut file = fs::File::create(dest).await?;
        let mut written = 0u64;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        debug!(url = %url, bytes = written, "Download complete");
        Ok(written)
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!(url = %url, "Fetching text");
        Ok(self.get(url).await?.text().await?)
    }
}
