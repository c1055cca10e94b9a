//! Step model
//!
//! A step is the smallest executable unit of a compiled job task. Each step
//! carries a type tag and a type-specific spec serialized as a raw value so
//! the compiled task can travel between orchestrator and runner; runners
//! decode the spec for their own tag.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Step kind tag. Closed set: the runner dispatches over it exhaustively.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepType {
    Shell,
    ToolInstall,
    Git,
    Archive,
    Deploy,
    HelmDeploy,
}

/// One executable step of a compiled job task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepTask {
    pub name: String,
    /// Name of the owning job task.
    pub job_name: String,
    pub step_type: StepType,
    pub spec: Value,
}

impl StepTask {
    pub fn new<S: Serialize>(
        name: impl Into<String>,
        job_name: impl Into<String>,
        step_type: StepType,
        spec: &S,
    ) -> crate::Result<Self> {
        Ok(Self {
            name: name.into(),
            job_name: job_name.into(),
            step_type,
            spec: serde_json::to_value(spec)
                .map_err(|e| crate::CoreError::decode(format!("encode step spec: {e}")))?,
        })
    }
}

/// Key/value environment variable. Credentials are never echoed to logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVal {
    pub key: String,
    pub value: String,
    #[serde(default)]
    pub is_credential: bool,
}

impl KeyVal {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            is_credential: false,
        }
    }
}

/// Source repository descriptor used by source-fetch steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub source: String,
    pub owner: String,
    pub repo_name: String,
    #[serde(default)]
    pub branch: String,
    #[serde(default)]
    pub pr: i64,
    #[serde(default)]
    pub commit_id: String,
    #[serde(default)]
    pub address: String,
    /// Checkout path relative to the workspace; repo name when empty.
    #[serde(default)]
    pub checkout_path: String,
}

impl Repository {
    /// Identity key used when merging repository lists.
    pub fn identity(&self) -> (String, String, String) {
        (
            self.source.clone(),
            self.owner.clone(),
            self.repo_name.clone(),
        )
    }
}

/// Object storage target consumed as an opaque service. Behavioral contract
/// is put/get by key; the concrete backend is wired by the worker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStorageInfo {
    pub endpoint: String,
    pub bucket: String,
    #[serde(default)]
    pub access_key: String,
    #[serde(default)]
    pub secret_key: String,
    #[serde(default)]
    pub insecure: bool,
    #[serde(default)]
    pub subfolder: String,
}

/// Backing medium of a build/test cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMedium {
    ObjectStorage,
    NetworkFilesystem,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NfsProperties {
    pub subpath: String,
    #[serde(default)]
    pub provision_type: String,
}

/// Cache configuration resolved from cluster metadata at compile time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSettings {
    pub medium: Option<CacheMedium>,
    #[serde(default)]
    pub nfs: NfsProperties,
}

/// Spec of a shell step: ordered script lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellStepSpec {
    pub scripts: Vec<String>,
}

/// A tool to install on the worker before scripts run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub version: String,
    /// Direct download URL; empty when the install scripts fetch themselves.
    #[serde(default)]
    pub download: String,
    #[serde(default)]
    pub scripts: Vec<String>,
    #[serde(default)]
    pub envs: Vec<KeyVal>,
}

/// Spec of a tool-install step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolInstallStepSpec {
    pub installs: Vec<Tool>,
    /// Cache for downloaded artifacts; cache failures never fail the step.
    #[serde(default)]
    pub storage: ObjectStorageInfo,
}

/// Spec of a source-fetch step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitStepSpec {
    pub repos: Vec<Repository>,
}

/// One file or directory to archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Upload {
    pub file_path: String,
    pub destination_path: String,
    /// Missing optional sources are logged and skipped, not failed.
    #[serde(default)]
    pub optional: bool,
}

/// Spec of an archive/upload step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveStepSpec {
    pub uploads: Vec<Upload>,
    pub storage: ObjectStorageInfo,
}

/// Spec of a per-module deploy step.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployStepSpec {
    pub env: String,
    pub service_name: String,
    pub service_module: String,
    pub cluster_id: String,
    pub image: String,
}

/// (module, image) binding inside a helm deploy step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleAndImage {
    pub service_module: String,
    pub image: String,
}

/// Spec of a helm-style deploy step: one release per service, all of that
/// service's module images applied together.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelmDeployStepSpec {
    pub env: String,
    pub service_name: String,
    pub cluster_id: String,
    pub images: Vec<ModuleAndImage>,
}
