//! Deploy and remove tasks.
//!
//! One task owns one `(deployment, replica)` slot: the directory
//! `app-{deployment}-{replica}`, the image `app-{deployment}:{replica}`,
//! and the container `app-{deployment}-{replica}`. Cleanup is idempotent
//! and always runs before a deploy, so a re-dispatched task starts from a
//! clean slot no matter how its predecessor died.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::fs;
use tracing::{debug, info, warn};

use flotilla_proto::ReplicaStatus;

use crate::drivers::{ContainerDriver, RepoDriver, RunSpec};

/// Phases of a deploy task, reported in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TaskPhase {
    Cloning,
    Building,
    Running,
    Reporting,
}

/// Tunables for the deploy task.
#[derive(Debug, Clone)]
pub struct TaskConfig {
    /// Build attempts before the task fails.
    pub build_attempts: u32,
    /// Pause between build attempts.
    pub build_backoff: Duration,
    /// CPU limit per replica, in cores.
    pub cpus: f64,
    /// Memory limit per replica, in MiB.
    pub memory_mib: u64,
    /// Grace period for a teardown stop.
    pub stop_grace: Duration,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            build_attempts: 3,
            build_backoff: Duration::from_secs(5),
            cpus: 1.0,
            memory_mib: 512,
            stop_grace: Duration::from_secs(10),
        }
    }
}

/// What a deploy task reports back to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub status: ReplicaStatus,
    pub port: Option<u16>,
    pub error: Option<String>,
}

/// Executes deploy and remove tasks against the drivers.
pub struct DeployTask {
    containers: Arc<dyn ContainerDriver>,
    repos: Arc<dyn RepoDriver>,
    config: TaskConfig,
}

/// Image tag for one replica's build.
pub fn image_tag(deployment_id: u64, replica_number: u32) -> String {
    format!("app-{deployment_id}:{replica_number}")
}

/// Container name for one replica.
pub fn container_name(deployment_id: u64, replica_number: u32) -> String {
    format!("app-{deployment_id}-{replica_number}")
}

/// Host port for one replica.
pub fn replica_port(replica_number: u32) -> u16 {
    8000 + replica_number as u16
}

impl DeployTask {
    pub fn new(
        containers: Arc<dyn ContainerDriver>,
        repos: Arc<dyn RepoDriver>,
        config: TaskConfig,
    ) -> Self {
        Self {
            containers,
            repos,
            config,
        }
    }

    fn phase(&self, deployment_id: u64, replica_number: u32, phase: TaskPhase) {
        debug!(deployment_id, replica_number, ?phase, "task phase");
    }

    /// Run a full deploy: cleanup, clone, build (with retries), run.
    ///
    /// Never returns an error — the outcome carries success or failure so
    /// the caller can report it on the fleet link. On failure the slot is
    /// cleaned again before returning.
    pub async fn deploy(
        &self,
        deployment_id: u64,
        replica_number: u32,
        dir: &Path,
        repo_url: &str,
    ) -> TaskOutcome {
        self.cleanup(deployment_id, replica_number, dir).await;

        match self
            .try_deploy(deployment_id, replica_number, dir, repo_url)
            .await
        {
            Ok(port) => {
                self.phase(deployment_id, replica_number, TaskPhase::Reporting);
                info!(deployment_id, replica_number, port, "replica running");
                TaskOutcome {
                    status: ReplicaStatus::Active,
                    port: Some(port),
                    error: None,
                }
            }
            Err(e) => {
                warn!(deployment_id, replica_number, error = %e, "deploy task failed");
                self.cleanup(deployment_id, replica_number, dir).await;
                self.phase(deployment_id, replica_number, TaskPhase::Reporting);
                TaskOutcome {
                    status: ReplicaStatus::Failed,
                    port: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    async fn try_deploy(
        &self,
        deployment_id: u64,
        replica_number: u32,
        dir: &Path,
        repo_url: &str,
    ) -> Result<u16> {
        self.phase(deployment_id, replica_number, TaskPhase::Cloning);
        self.repos
            .clone_shallow(repo_url, dir)
            .await
            .context("cloning repository")?;
        scaffold(dir).await.context("scaffolding build inputs")?;

        self.phase(deployment_id, replica_number, TaskPhase::Building);
        let tag = image_tag(deployment_id, replica_number);
        self.build_with_retry(&tag, dir).await?;

        self.phase(deployment_id, replica_number, TaskPhase::Running);
        let port = replica_port(replica_number);
        self.containers
            .run_container(&RunSpec {
                name: container_name(deployment_id, replica_number),
                image: tag,
                port,
                cpus: self.config.cpus,
                memory_mib: self.config.memory_mib,
            })
            .await
            .context("starting container")?;

        Ok(port)
    }

    async fn build_with_retry(&self, tag: &str, dir: &Path) -> Result<()> {
        let mut last_err = None;
        for attempt in 1..=self.config.build_attempts {
            match self.containers.build_image(tag, dir).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(%tag, attempt, error = %e, "image build failed");
                    last_err = Some(e);
                    if attempt < self.config.build_attempts {
                        tokio::time::sleep(self.config.build_backoff).await;
                    }
                }
            }
        }
        Err(last_err
            .unwrap_or_else(|| anyhow::anyhow!("build failed with no attempts"))
            .context(format!(
                "image build exhausted {} attempts",
                self.config.build_attempts
            )))
    }

    /// Best-effort removal of whatever a previous task left in this slot.
    pub async fn cleanup(&self, deployment_id: u64, replica_number: u32, dir: &Path) {
        let name = container_name(deployment_id, replica_number);
        if let Err(e) = self.containers.stop_container(&name, Duration::ZERO).await {
            debug!(%name, error = %e, "cleanup stop (likely nothing to stop)");
        }
        if let Err(e) = self.containers.remove_container(&name, true).await {
            debug!(%name, error = %e, "cleanup remove (likely nothing to remove)");
        }
        if let Err(e) = fs::remove_dir_all(dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(?dir, error = %e, "cleanup could not remove directory");
            }
        }
    }

    /// Full teardown of a replica on orchestrator request.
    pub async fn remove(&self, deployment_id: u64, replica_number: u32, dir: &Path) -> Result<()> {
        let name = container_name(deployment_id, replica_number);

        if let Err(e) = self
            .containers
            .stop_container(&name, self.config.stop_grace)
            .await
        {
            debug!(%name, error = %e, "stop before removal failed");
        }
        self.containers.remove_container(&name, true).await?;
        self.containers
            .remove_image(&image_tag(deployment_id, replica_number))
            .await?;

        if let Err(e) = fs::remove_dir_all(dir).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e).context("removing deployment directory");
            }
        }

        info!(deployment_id, replica_number, "replica removed");
        Ok(())
    }
}

/// Make sure the clone is buildable: an empty `requirements.txt` when the
/// app ships none, and a default Dockerfile when the repo has no build
/// descriptor of its own.
async fn scaffold(dir: &Path) -> Result<()> {
    let requirements = dir.join("requirements.txt");
    if !requirements.exists() {
        fs::write(&requirements, "").await?;
    }

    let dockerfile = dir.join("Dockerfile");
    if !dockerfile.exists() {
        fs::write(&dockerfile, DEFAULT_DOCKERFILE).await?;
    }
    Ok(())
}

const DEFAULT_DOCKERFILE: &str = "\
FROM python:3.11-slim
WORKDIR /app
COPY requirements.txt .
RUN pip install --no-cache-dir -r requirements.txt
COPY . .
ENV PORT=8000
CMD [\"python\", \"app.py\"]
";
