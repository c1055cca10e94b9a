//! Archive step
//!
//! Uploads job outputs to the configured artifact store. Sources are resolved
//! against the workspace; a missing source fails the step unless the upload
//! is flagged optional, in which case it is logged and skipped.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use forge_core::domain::ArchiveStepSpec;

use crate::storage::{HttpObjectStorage, ObjectStorage, object_path};

pub(crate) async fn upload_all(
    storage: &Arc<dyn ObjectStorage>,
    spec: &ArchiveStepSpec,
    workspace: &Path,
) -> Result<()> {
    for upload in &spec.uploads {
        let src = workspace.join(&upload.file_path);
        if !src.exists() {
            if upload.optional {
                warn!(path = %src.display(), "optional archive source missing, skipping");
                continue;
            }
            anyhow::bail!("archive source missing: {}", src.display());
        }

        let filename = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| upload.file_path.clone());
        let key = object_path(&upload.destination_path, &filename);
        info!(src = %src.display(), %key, "archiving");
        storage.upload(&src, &key).await?;
    }
    Ok(())
}

pub async fn run(spec: &ArchiveStepSpec, workspace: &Path) -> Result<()> {
    if spec.uploads.is_empty() {
        return Ok(());
    }
    let storage: Arc<dyn ObjectStorage> = Arc::new(HttpObjectStorage::from_info(&spec.storage)?);
    upload_all(&storage, spec, workspace).await
}
