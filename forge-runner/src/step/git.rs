//! Git source fetch step
//!
//! Clones or updates each declared repository into the workspace, then checks
//! out the requested ref. A commit pin wins over a pull request, which wins
//! over a branch.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use forge_core::domain::{GitStepSpec, Repository};

use super::run_command;

/// Clone URL of a repository descriptor.
fn clone_url(repo: &Repository) -> String {
    format!(
        "{}/{}/{}.git",
        repo.address.trim_end_matches('/'),
        repo.owner,
        repo.repo_name
    )
}

/// Directory the repository is checked out into, relative to the workspace.
fn checkout_dir(workspace: &Path, repo: &Repository) -> PathBuf {
    if repo.checkout_path.is_empty() {
        workspace.join(&repo.repo_name)
    } else {
        workspace.join(&repo.checkout_path)
    }
}

/// The ref to fetch and the target to check out, in priority order.
fn checkout_target(repo: &Repository) -> (Option<String>, String) {
    if !repo.commit_id.is_empty() {
        (None, repo.commit_id.clone())
    } else if repo.pr > 0 {
        (
            Some(format!("refs/pull/{}/head", repo.pr)),
            "FETCH_HEAD".to_string(),
        )
    } else {
        (
            Some(repo.branch.clone()),
            format!("origin/{}", repo.branch),
        )
    }
}

async fn fetch_repo(
    repo: &Repository,
    workspace: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    let dir = checkout_dir(workspace, repo);
    let url = clone_url(repo);

    if dir.join(".git").is_dir() {
        info!(repo = %repo.repo_name, "updating existing checkout");
    } else {
        info!(repo = %repo.repo_name, %url, "cloning");
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("create {}", dir.display()))?;
        run_command(
            "git",
            &["clone".to_string(), url, ".".to_string()],
            Some(&dir),
            cancel,
        )
        .await?;
    }

    let (fetch_ref, target) = checkout_target(repo);
    if let Some(fetch_ref) = fetch_ref {
        run_command(
            "git",
            &["fetch".to_string(), "origin".to_string(), fetch_ref],
            Some(&dir),
            cancel,
        )
        .await?;
    }
    run_command(
        "git",
        &["checkout".to_string(), "-f".to_string(), target],
        Some(&dir),
        cancel,
    )
    .await
    .with_context(|| format!("checkout {}/{}", repo.owner, repo.repo_name))
}

pub async fn run(
    spec: &GitStepSpec,
    workspace: &Path,
    cancel: &CancellationToken,
) -> Result<()> {
    for repo in &spec.repos {
        fetch_repo(repo, workspace, cancel).await?;
    }
    Ok(())
}
