//! Artifact storage and download ports
//!
//! Steps that move files in or out of the worker go through these traits so
//! the step runners stay testable without a live object store. The HTTP
//! implementations talk to an S3-compatible gateway with plain GET/PUT.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::debug;

use forge_core::domain::ObjectStorageInfo;

/// Object storage operations the step runners need.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Downloads `key` into `dest`. Errors when the object is absent.
    async fn download(&self, key: &str, dest: &Path) -> Result<()>;

    /// Uploads the file at `src` under `key`.
    async fn upload(&self, src: &Path, key: &str) -> Result<()>;
}

/// Plain URL downloads, used when a tool has no cached copy.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()>;
}

/// Joins subfolder and filename into an object key, without leading slashes.
pub fn object_path(subfolder: &str, name: &str) -> String {
    let subfolder = subfolder.trim_matches('/');
    let name = name.trim_start_matches('/');
    if subfolder.is_empty() {
        name.to_string()
    } else {
        format!("{subfolder}/{name}")
    }
}

/// Object storage over an S3-compatible HTTP gateway.
pub struct HttpObjectStorage {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    subfolder: String,
}

impl HttpObjectStorage {
    /// Builds a client from the storage info a step carries. Fails when no
    /// store is configured so callers can fall back to direct downloads.
    pub fn from_info(info: &ObjectStorageInfo) -> Result<Self> {
        if info.endpoint.is_empty() {
            anyhow::bail!("no object storage endpoint configured");
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint: info.endpoint.trim_end_matches('/').to_string(),
            bucket: info.bucket.clone(),
            subfolder: info.subfolder.clone(),
        })
    }

    fn object_url(&self, key: &str) -> String {
        let key = object_path(&self.subfolder, key);
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
    async fn download(&self, key: &str, dest: &Path) -> Result<()> {
        let url = self.object_url(key);
        debug!(%url, "downloading object");
        let resp = self.client.get(&url).send().await?.error_for_status()?;
        let body = resp.bytes().await?;
        tokio::fs::write(dest, &body)
            .await
            .with_context(|| format!("write {}", dest.display()))?;
        Ok(())
    }

    async fn upload(&self, src: &Path, key: &str) -> Result<()> {
        let url = self.object_url(key);
        debug!(%url, "uploading object");
        let body = tokio::fs::read(src)
            .await
            .with_context(|| format!("read {}", src.display()))?;
        self.client
            .put(&url)
            .body(body)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Direct URL downloads via reqwest.
pub struct HttpDownloader {
    client: reqwest::Client,
}

impl HttpDownloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        debug!(%url, "fetching");
        let resp = self.client.get(url).send().await?.error_for_status()?;
        let body = resp.bytes().await?;
        tokio::fs::write(dest, &body)
            .await
            .with_context(|| format!("write {}", dest.display()))?;
        Ok(())
    }
}
