//! Catalog ports consumed by the job compiler
//!
//! The compiler enriches and resolves job declarations against live
//! collaborators: the project catalog (deploy mechanism), the service catalog
//! (services and their modules), cluster metadata (environments, caches),
//! test definitions and the default artifact store. All of them are consumed
//! behind async traits so compilation is testable against fakes and the
//! concrete clients stay outside this crate.

use async_trait::async_trait;
use forge_core::domain::{CacheSettings, KeyVal, ObjectStorageInfo, Repository, Tool};
use forge_core::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// How a project's services are deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeployMechanism {
    /// One deploy action per (service, module) pair.
    PerHost,
    /// One helm release per service, all module images applied together.
    Helm,
}

/// A service and its modules as known to the service catalog.
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    pub name: String,
    pub modules: Vec<String>,
}

/// Cluster metadata relevant to compilation.
#[derive(Debug, Clone, Default)]
pub struct ClusterInfo {
    pub id: String,
    pub cache: CacheSettings,
}

/// A test definition as authored in the platform.
#[derive(Debug, Clone, Default)]
pub struct TestingDefinition {
    pub name: String,
    /// Timeout in seconds for one compiled test task.
    pub timeout: i64,
    pub cluster_id: String,
    /// Script body; may contain backslash line continuations.
    pub scripts: String,
    /// HTML report location; empty means no report archive step.
    pub test_report_path: String,
    pub artifact_paths: Vec<String>,
    pub installs: Vec<Tool>,
    pub repos: Vec<Repository>,
    pub envs: Vec<KeyVal>,
    pub cache_enable: bool,
    pub cache_user_dir: String,
}

/// Project-level metadata lookups.
#[async_trait]
pub trait ProjectCatalog: Send + Sync {
    async fn deploy_mechanism(&self, project: &str) -> Result<DeployMechanism>;
}

/// Service catalog lookups.
#[async_trait]
pub trait ServiceCatalog: Send + Sync {
    async fn list_services(&self, project: &str) -> Result<Vec<ServiceInfo>>;
}

/// Environment and cluster metadata lookups.
#[async_trait]
pub trait ClusterCatalog: Send + Sync {
    /// Resolves the cluster serving (project, environment).
    async fn env_cluster(&self, project: &str, env: &str) -> Result<String>;

    async fn get(&self, cluster_id: &str) -> Result<ClusterInfo>;
}

/// Test definition lookups.
#[async_trait]
pub trait TestingCatalog: Send + Sync {
    async fn find(&self, name: &str) -> Result<TestingDefinition>;
}

/// Artifact store lookups.
#[async_trait]
pub trait StorageCatalog: Send + Sync {
    async fn find_default(&self) -> Result<ObjectStorageInfo>;
}

/// Convenience constructor for the error every catalog returns on a miss.
pub fn missing(entity: &'static str, name: &str) -> CoreError {
    CoreError::lookup(entity, name, "not found")
}
