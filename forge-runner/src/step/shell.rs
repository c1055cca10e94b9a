//! Shell step
//!
//! Writes the compiled script lines to a scratch file and runs them through
//! `/bin/bash` under the merged job environment.

use std::path::Path;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::info;

use forge_core::domain::ShellStepSpec;

use super::{mask, run_bash_script, write_scratch_script};

pub async fn run(
    spec: &ShellStepSpec,
    workspace: &Path,
    envs: &[(String, String)],
    secrets: &[String],
    cancel: &CancellationToken,
) -> Result<()> {
    if spec.scripts.is_empty() {
        return Ok(());
    }
    info!(
        preview = %mask(&spec.scripts.join(" && "), secrets),
        "running shell script"
    );

    let script = write_scratch_script(&spec.scripts)?;
    let result = run_bash_script(&script, workspace, envs, cancel).await;
    std::fs::remove_file(&script).ok();
    result
}
