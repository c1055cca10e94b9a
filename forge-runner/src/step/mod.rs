//! Step runners
//!
//! One module per step kind. `run_step` decodes the typed spec out of a step
//! task and dispatches; unknown kinds cannot occur because the tag enum is
//! exhaustive.

mod archive;
mod deploy;
mod git;
mod shell;
mod tool_install;

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use forge_core::domain::{StepTask, StepType};
use forge_core::spec_util::decode_spec;

/// Runs one step to completion under the merged job environment.
pub async fn run_step(
    task: &StepTask,
    workspace: &Path,
    envs: &[(String, String)],
    secrets: &[String],
    cancel: &CancellationToken,
) -> Result<()> {
    match task.step_type {
        StepType::Shell => {
            shell::run(&decode_spec(&task.spec)?, workspace, envs, secrets, cancel).await
        }
        StepType::ToolInstall => {
            tool_install::run(&decode_spec(&task.spec)?, workspace, envs, cancel).await
        }
        StepType::Git => git::run(&decode_spec(&task.spec)?, workspace, cancel).await,
        StepType::Archive => archive::run(&decode_spec(&task.spec)?, workspace).await,
        StepType::Deploy => deploy::run_per_host(&decode_spec(&task.spec)?, cancel).await,
        StepType::HelmDeploy => deploy::run_helm(&decode_spec(&task.spec)?, cancel).await,
    }
}

/// Replaces secret values with asterisks in a logged preview.
pub(crate) fn mask(preview: &str, secrets: &[String]) -> String {
    let mut masked = preview.to_string();
    for secret in secrets {
        masked = masked.replace(secret, "********");
    }
    masked
}

/// Writes script lines to a scratch file under the system temp dir, with a
/// `set -ex` preamble so every command echoes and failures abort.
pub(crate) fn write_scratch_script(lines: &[String]) -> Result<PathBuf> {
    let path = std::env::temp_dir().join(format!("forge-step-{}.sh", uuid::Uuid::new_v4().simple()));
    let mut body = String::from("#!/bin/bash\nset -ex\n");
    for line in lines {
        body.push_str(line);
        body.push('\n');
    }
    std::fs::write(&path, body).with_context(|| format!("write script {}", path.display()))?;
    Ok(path)
}

/// Runs a bash script with the merged environment, workspace cwd and
/// inherited stdio. Cancellation kills the child.
pub(crate) async fn run_bash_script(
    script: &Path,
    workspace: &Path,
    envs: &[(String, String)],
    cancel: &CancellationToken,
) -> Result<()> {
    let mut child = tokio::process::Command::new("/bin/bash")
        .arg(script)
        .current_dir(workspace)
        .envs(envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .spawn()
        .context("spawn /bin/bash")?;

    tokio::select! {
        status = child.wait() => {
            let status = status.context("wait for script")?;
            if !status.success() {
                anyhow::bail!("script exited with {status}");
            }
            Ok(())
        }
        _ = cancel.cancelled() => {
            child.start_kill().ok();
            info!("script killed by cancellation");
            anyhow::bail!("step cancelled")
        }
    }
}

/// Runs an external command, surfacing stderr in the error on failure.
/// Cancellation kills the child.
pub(crate) async fn run_command(
    program: &str,
    args: &[String],
    cwd: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<()> {
    let mut cmd = tokio::process::Command::new(program);
    cmd.args(args).stdout(Stdio::inherit()).stderr(Stdio::piped());
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }
    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawn {program}"))?;

    // Drain stderr while the child runs. A full pipe buffer would otherwise
    // block the child's writes and deadlock it against our wait().
    let stderr = child.stderr.take();
    let drain = tokio::spawn(async move {
        let mut detail = String::new();
        if let Some(mut pipe) = stderr {
            use tokio::io::AsyncReadExt;
            pipe.read_to_string(&mut detail).await.ok();
        }
        detail
    });

    tokio::select! {
        status = child.wait() => {
            let status = status.with_context(|| format!("wait for {program}"))?;
            let detail = drain.await.unwrap_or_default();
            if !status.success() {
                anyhow::bail!("{program} exited with {status}: {}", detail.trim());
            }
            Ok(())
        }
        _ = cancel.cancelled() => {
            child.start_kill().ok();
            drain.abort();
            anyhow::bail!("{program} cancelled")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_hides_secret_values() {
        let masked = mask(
            "curl -H 'Authorization: Bearer s3cret' https://x",
            &["s3cret".to_string()],
        );
        assert!(!masked.contains("s3cret"));
        assert!(masked.contains("********"));
    }

    #[tokio::test]
    async fn test_run_command_drains_large_stderr() {
        // A child filling the stderr pipe past its buffer must not wedge
        // against our wait().
        let result = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            run_command(
                "bash",
                &[
                    "-c".to_string(),
                    "head -c 200000 /dev/zero | tr '\\0' 'x' 1>&2; exit 1".to_string(),
                ],
                None,
                &CancellationToken::new(),
            ),
        )
        .await
        .expect("run_command stalled on large stderr");
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_run_command_surfaces_stderr_detail() {
        let err = run_command(
            "bash",
            &["-c".to_string(), "echo oops >&2; exit 3".to_string()],
            None,
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("oops"));
    }

    #[test]
    fn test_scratch_script_has_preamble() {
        let path = write_scratch_script(&["echo hi".to_string()]).unwrap();
        let body = std::fs::read_to_string(&path).unwrap();
        assert!(body.starts_with("#!/bin/bash\nset -ex\n"));
        assert!(body.contains("echo hi\n"));
        std::fs::remove_file(path).unwrap();
    }
}
