//! Deploy steps
//!
//! Applies compiled image updates to a live environment. Per-host deploys
//! patch one workload image via `kubectl set image`; helm deploys upgrade the
//! service release with all module images at once.

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use forge_core::domain::{DeployStepSpec, HelmDeployStepSpec};

use super::run_command;

/// Arguments of the `kubectl` invocation for a per-host deploy.
fn kubectl_args(spec: &DeployStepSpec) -> Vec<String> {
    let mut args = vec![
        "set".to_string(),
        "image".to_string(),
        format!("deployment/{}", spec.service_name),
        format!("{}={}", spec.service_module, spec.image),
        "--namespace".to_string(),
        spec.env.clone(),
    ];
    if !spec.cluster_id.is_empty() {
        args.push("--context".to_string());
        args.push(spec.cluster_id.clone());
    }
    args
}

/// Arguments of the `helm` invocation for a helm deploy.
fn helm_args(spec: &HelmDeployStepSpec) -> Vec<String> {
    let mut args = vec![
        "upgrade".to_string(),
        spec.service_name.clone(),
        "--namespace".to_string(),
        spec.env.clone(),
        "--reuse-values".to_string(),
    ];
    if !spec.cluster_id.is_empty() {
        args.push("--kube-context".to_string());
        args.push(spec.cluster_id.clone());
    }
    for binding in &spec.images {
        args.push("--set".to_string());
        args.push(format!("image.{}={}", binding.service_module, binding.image));
    }
    args
}

pub async fn run_per_host(spec: &DeployStepSpec, cancel: &CancellationToken) -> Result<()> {
    info!(
        service = %spec.service_name,
        module = %spec.service_module,
        image = %spec.image,
        env = %spec.env,
        "applying image update"
    );
    run_command("kubectl", &kubectl_args(spec), None, cancel)
        .await
        .with_context(|| format!("deploy {}/{}", spec.service_name, spec.service_module))
}

pub async fn run_helm(spec: &HelmDeployStepSpec, cancel: &CancellationToken) -> Result<()> {
    info!(
        service = %spec.service_name,
        images = spec.images.len(),
        env = %spec.env,
        "upgrading helm release"
    );
    run_command("helm", &helm_args(spec), None, cancel)
        .await
        .with_context(|| format!("helm upgrade {}", spec.service_name))
}
