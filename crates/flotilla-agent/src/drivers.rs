//! Driver traits for the external tools the agent depends on.
//!
//! The orchestration logic never shells out directly; it goes through
//! these capabilities so tests can run against fakes.

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// How to run one replica container.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSpec {
    pub name: String,
    pub image: String,
    /// Host port, also injected as `PORT` into the container.
    pub port: u16,
    /// CPU limit in cores.
    pub cpus: f64,
    /// Memory limit in MiB.
    pub memory_mib: u64,
}

/// One row of container resource usage.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerStats {
    pub name: String,
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

/// Container-engine capability: build, run, stop, remove, observe.
#[async_trait]
pub trait ContainerDriver: Send + Sync {
    async fn build_image(&self, tag: &str, context_dir: &Path) -> Result<()>;
    async fn run_container(&self, spec: &RunSpec) -> Result<()>;
    /// Stop with a grace period before the engine kills the process.
    async fn stop_container(&self, name: &str, grace: Duration) -> Result<()>;
    async fn remove_container(&self, name: &str, force: bool) -> Result<()>;
    async fn remove_image(&self, tag: &str) -> Result<()>;
    /// Usage of all running containers on this host.
    async fn stats(&self) -> Result<Vec<ContainerStats>>;
}

/// Version-control capability.
#[async_trait]
pub trait RepoDriver: Send + Sync {
    /// Clone only the tip of the default branch into `dest`.
    async fn clone_shallow(&self, url: &str, dest: &Path) -> Result<()>;
}
