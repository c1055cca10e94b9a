//! Tool install step
//!
//! Installs each declared tool before the job script runs. Tools with a
//! download URL are fetched cache-first: a cached copy in object storage wins,
//! a miss falls back to the direct URL and then populates the cache
//! best-effort. Install scripts see the fetched file through the `$FILEPATH`
//! placeholder.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use forge_core::domain::{Tool, ToolInstallStepSpec};

use crate::storage::{Downloader, HttpDownloader, HttpObjectStorage, ObjectStorage, object_path};

use super::{run_bash_script, write_scratch_script};

/// The placeholder install scripts use for the fetched artifact.
const FILEPATH_PLACEHOLDER: &str = "$FILEPATH";

pub struct ToolInstaller {
    storage: Option<Arc<dyn ObjectStorage>>,
    downloader: Arc<dyn Downloader>,
}

impl ToolInstaller {
    pub fn new(storage: Option<Arc<dyn ObjectStorage>>, downloader: Arc<dyn Downloader>) -> Self {
        Self {
            storage,
            downloader,
        }
    }

    /// Cache key of a tool artifact: versioned folder plus the URL filename.
    fn cache_key(tool: &Tool) -> String {
        let filename = tool
            .download
            .rsplit('/')
            .next()
            .unwrap_or(tool.download.as_str());
        object_path(&format!("{}-v{}", tool.name, tool.version), filename)
    }

    /// Fetches the tool artifact into `dest_dir`, cache first.
    pub async fn fetch_artifact(&self, tool: &Tool, dest_dir: &Path) -> Result<PathBuf> {
        let key = Self::cache_key(tool);
        let dest = dest_dir.join(
            key.rsplit('/')
                .next()
                .expect("cache key has a filename")
                .to_string(),
        );

        if let Some(storage) = &self.storage {
            if storage.download(&key, &dest).await.is_ok() {
                info!(tool = %tool.name, %key, "tool found in cache");
                return Ok(dest);
            }
        }

        info!(tool = %tool.name, url = %tool.download, "cache miss, downloading");
        self.downloader
            .fetch(&tool.download, &dest)
            .await
            .with_context(|| format!("download {}", tool.download))?;

        // Populate the cache for the next run; failures never fail the step.
        if let Some(storage) = &self.storage {
            if let Err(e) = storage.upload(&dest, &key).await {
                warn!(tool = %tool.name, error = %e, "failed to cache tool artifact");
            }
        }
        Ok(dest)
    }

    /// Install script lines with the artifact path substituted in.
    pub fn render_scripts(tool: &Tool, artifact: Option<&Path>) -> Vec<String> {
        let filepath = artifact.map(|p| p.display().to_string()).unwrap_or_default();
        tool.scripts
            .iter()
            .map(|line| line.replace(FILEPATH_PLACEHOLDER, &filepath))
            .collect()
    }

    pub async fn install(
        &self,
        tool: &Tool,
        workspace: &Path,
        envs: &[(String, String)],
        cancel: &CancellationToken,
    ) -> Result<()> {
        let artifact = if tool.download.is_empty() {
            None
        } else {
            // Scratch dir inside the workspace: it is exclusive to this job,
            // so concurrent runners never race on the same artifact path.
            let scratch = workspace.join(".forge-tools");
            std::fs::create_dir_all(&scratch)
                .with_context(|| format!("create {}", scratch.display()))?;
            Some(self.fetch_artifact(tool, &scratch).await?)
        };

        let lines = Self::render_scripts(tool, artifact.as_deref());
        if lines.is_empty() {
            return Ok(());
        }

        let mut merged: Vec<(String, String)> = envs.to_vec();
        merged.extend(
            tool.envs
                .iter()
                .map(|kv| (kv.key.clone(), kv.value.clone())),
        );

        let script = write_scratch_script(&lines)?;
        let result = run_bash_script(&script, workspace, &merged, cancel).await;
        std::fs::remove_file(&script).ok();
        result.with_context(|| format!("install {} v{}", tool.name, tool.version))
    }
}

pub async fn run(
    spec: &ToolInstallStepSpec,
    workspace: &Path,
    envs: &[(String, String)],
    cancel: &CancellationToken,
) -> Result<()> {
    let storage = HttpObjectStorage::from_info(&spec.storage)
        .ok()
        .map(|s| Arc::new(s) as Arc<dyn ObjectStorage>);
    let installer = ToolInstaller::new(storage, Arc::new(HttpDownloader::new()));

    for tool in &spec.installs {
        installer.install(tool, workspace, envs, cancel).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeStorage {
        cached: bool,
        upload_fails: bool,
        downloads: AtomicUsize,
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl ObjectStorage for FakeStorage {
        async fn download(&self, _key: &str, dest: &Path) -> Result<()> {
            self.downloads.fetch_add(1, Ordering::SeqCst);
            if self.cached {
                std::fs::write(dest, b"cached")?;
                Ok(())
            } else {
                anyhow::bail!("not found")
            }
        }

        async fn upload(&self, _src: &Path, _key: &str) -> Result<()> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.upload_fails {
                anyhow::bail!("storage unavailable")
            }
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeDownloader {
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl Downloader for FakeDownloader {
        async fn fetch(&self, _url: &str, dest: &Path) -> Result<()> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            std::fs::write(dest, b"fresh")?;
            Ok(())
        }
    }

    fn go_tool() -> Tool {
        Tool {
            name: "go".to_string(),
            version: "1.22".to_string(),
            download: "https://dl.example.com/go1.22.linux-amd64.tar.gz".to_string(),
            scripts: vec!["tar -C /usr/local -xzf $FILEPATH".to_string()],
            envs: vec![],
        }
    }

    #[test]
    fn test_cache_key() {
        assert_eq!(
            ToolInstaller::cache_key(&go_tool()),
            "go-v1.22/go1.22.linux-amd64.tar.gz"
        );
    }

    #[tokio::test]
    async fn test_cache_hit_skips_download() {
        let storage = Arc::new(FakeStorage {
            cached: true,
            ..Default::default()
        });
        let downloader = Arc::new(FakeDownloader::default());
        let installer = ToolInstaller::new(Some(storage.clone()), downloader.clone());

        let dir = tempfile::tempdir().unwrap();
        let artifact = installer
            .fetch_artifact(&go_tool(), dir.path())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&artifact).unwrap(), b"cached");
        assert_eq!(downloader.fetches.load(Ordering::SeqCst), 0);
        assert_eq!(storage.uploads.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_cache_miss_downloads_and_populates() {
        let storage = Arc::new(FakeStorage::default());
        let downloader = Arc::new(FakeDownloader::default());
        let installer = ToolInstaller::new(Some(storage.clone()), downloader.clone());

        let dir = tempfile::tempdir().unwrap();
        let artifact = installer
            .fetch_artifact(&go_tool(), dir.path())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&artifact).unwrap(), b"fresh");
        assert_eq!(downloader.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(storage.uploads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cache_populate_failure_is_ignored() {
        let storage = Arc::new(FakeStorage {
            upload_fails: true,
            ..Default::default()
        });
        let installer =
            ToolInstaller::new(Some(storage), Arc::new(FakeDownloader::default()));

        let dir = tempfile::tempdir().unwrap();
        assert!(
            installer
                .fetch_artifact(&go_tool(), dir.path())
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_install_fetches_into_workspace_scratch_dir() {
        let downloader = Arc::new(FakeDownloader::default());
        let installer = ToolInstaller::new(None, downloader.clone());

        let tool = Tool {
            scripts: vec![],
            ..go_tool()
        };
        let workspace = tempfile::tempdir().unwrap();
        installer
            .install(&tool, workspace.path(), &[], &CancellationToken::new())
            .await
            .unwrap();

        let artifact = workspace
            .path()
            .join(".forge-tools/go1.22.linux-amd64.tar.gz");
        assert_eq!(std::fs::read(&artifact).unwrap(), b"fresh");
        assert_eq!(downloader.fetches.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_filepath_substitution() {
        let lines =
            ToolInstaller::render_scripts(&go_tool(), Some(Path::new("/tmp/go.tar.gz")));
        assert_eq!(lines, vec!["tar -C /usr/local -xzf /tmp/go.tar.gz".to_string()]);

        let tool = Tool {
            download: String::new(),
            scripts: vec!["apt-get install -y jq".to_string()],
            ..go_tool()
        };
        let lines = ToolInstaller::render_scripts(&tool, None);
        assert_eq!(lines, vec!["apt-get install -y jq".to_string()]);
    }
}
