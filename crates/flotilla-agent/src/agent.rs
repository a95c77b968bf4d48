//! The agent's connection loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use flotilla_proto::{decode_line, encode_line, Message};

use crate::drivers::{ContainerDriver, RepoDriver};
use crate::task::{container_name, DeployTask, TaskConfig};
use crate::telemetry::{aggregate_load, derive_state, SystemProbe};

/// Worker agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Orchestrator fleet-link address, `host:port`.
    pub server_addr: String,
    /// Advertised hostname; the orchestrator keys worker identity on it.
    pub hostname: String,
    /// Root under which deployment directories are created.
    pub deployment_root: PathBuf,
    /// How often to report load.
    pub telemetry_interval: Duration,
    /// Pause between reconnect attempts.
    pub reconnect_backoff: Duration,
    pub task: TaskConfig,
}

impl AgentConfig {
    pub fn new(server_addr: &str, hostname: &str) -> Self {
        Self {
            server_addr: server_addr.to_string(),
            hostname: hostname.to_string(),
            deployment_root: PathBuf::from("./deployments"),
            telemetry_interval: Duration::from_secs(15),
            reconnect_backoff: Duration::from_secs(5),
            task: TaskConfig::default(),
        }
    }
}

/// The worker agent: one persistent fleet-link connection plus the tasks
/// it spawns.
pub struct WorkerAgent {
    config: AgentConfig,
    containers: Arc<dyn ContainerDriver>,
    repos: Arc<dyn RepoDriver>,
    probe: Arc<dyn SystemProbe>,
    started_at: u64,
}

impl WorkerAgent {
    pub fn new(
        config: AgentConfig,
        containers: Arc<dyn ContainerDriver>,
        repos: Arc<dyn RepoDriver>,
        probe: Arc<dyn SystemProbe>,
    ) -> Self {
        Self {
            config,
            containers,
            repos,
            probe,
            started_at: epoch_secs(),
        }
    }

    /// Connect, serve, reconnect — until shutdown.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<()> {
        loop {
            match TcpStream::connect(&self.config.server_addr).await {
                Ok(stream) => {
                    info!(addr = %self.config.server_addr, "connected to orchestrator");
                    match self.run_connection(stream, &mut shutdown).await {
                        Ok(true) => return Ok(()), // shutdown requested
                        Ok(false) => warn!("connection closed by orchestrator"),
                        Err(e) => warn!(error = %e, "connection failed"),
                    }
                }
                Err(e) => {
                    warn!(addr = %self.config.server_addr, error = %e, "connect failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.reconnect_backoff) => {}
                _ = shutdown.changed() => return Ok(()),
            }
        }
    }

    /// Serve one connection. Returns Ok(true) on shutdown, Ok(false) when
    /// the peer closed the link.
    async fn run_connection(
        &self,
        stream: TcpStream,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<bool> {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        // Writer task: everything outbound goes through one channel, so
        // frames reach the orchestrator in the order they were produced.
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        let writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                let line = match encode_line(&message) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!(error = %e, "dropping unencodable frame");
                        continue;
                    }
                };
                if write_half.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        tx.send(Message::RegisterWorker {
            hostname: self.config.hostname.clone(),
            start_time: self.started_at,
            current_user: std::env::var("USER").unwrap_or_else(|_| "unknown".to_string()),
        })
        .context("queueing registration")?;

        let mut worker_id: Option<u64> = None;
        let mut telemetry = tokio::time::interval(self.config.telemetry_interval);
        telemetry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so registration lands
        // before the first status report.
        telemetry.tick().await;

        let done = loop {
            tokio::select! {
                line = lines.next_line() => {
                    match line {
                        Ok(Some(line)) => {
                            match decode_line(&line) {
                                Ok(message) => {
                                    self.handle_frame(message, &mut worker_id, &tx);
                                }
                                Err(e) => warn!(error = %e, "dropping malformed frame"),
                            }
                        }
                        Ok(None) => break false,
                        Err(e) => {
                            warn!(error = %e, "fleet link read failed");
                            break false;
                        }
                    }
                }
                _ = telemetry.tick() => {
                    if let Some(id) = worker_id {
                        self.report_status(id, &tx).await;
                    }
                }
                _ = shutdown.changed() => break true,
            }
        };

        drop(tx);
        let _ = writer.await;
        Ok(done)
    }

    fn handle_frame(
        &self,
        message: Message,
        worker_id: &mut Option<u64>,
        tx: &mpsc::UnboundedSender<Message>,
    ) {
        match message {
            Message::WorkerRegistered { id } => {
                info!(worker_id = id, "registered with orchestrator");
                *worker_id = Some(id);
            }
            Message::DeployRepository {
                deployment_dir,
                repo_url,
                replica_id,
                deployment_id,
                ..
            } => {
                let id = worker_id.unwrap_or(0);
                let dir = self.slot_dir(&deployment_dir, deployment_id, replica_id);
                let task = self.task();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let outcome = task.deploy(deployment_id, replica_id, &dir, &repo_url).await;
                    let _ = tx.send(Message::DeploymentStatus {
                        worker_id: id,
                        deployment_id,
                        replica_id,
                        status: outcome.status,
                        port: outcome.port,
                        metrics: None,
                        error: outcome.error,
                        timestamp: epoch_secs(),
                    });
                });
            }
            Message::RemoveReplica {
                deployment_id,
                replica_id,
            } => {
                let id = worker_id.unwrap_or(0);
                let name = container_name(deployment_id, replica_id);
                let dir = self.config.deployment_root.join(&name);
                let task = self.task();
                let tx = tx.clone();
                tokio::spawn(async move {
                    match task.remove(deployment_id, replica_id, &dir).await {
                        Ok(()) => {
                            let _ = tx.send(Message::ReplicaRemoved {
                                worker_id: id,
                                deployment_id,
                                replica_id,
                                timestamp: epoch_secs(),
                            });
                        }
                        Err(e) => warn!(
                            deployment_id,
                            replica_id,
                            error = %e,
                            "replica removal failed"
                        ),
                    }
                });
            }
            Message::Error { message } => {
                warn!(%message, "orchestrator reported an error");
            }
            other => {
                debug!(?other, "ignoring unexpected frame");
            }
        }
    }

    async fn report_status(&self, worker_id: u64, tx: &mpsc::UnboundedSender<Message>) {
        let stats = match self.containers.stats().await {
            Ok(stats) => stats,
            Err(e) => {
                warn!(error = %e, "container stats unavailable");
                Vec::new()
            }
        };

        let load = aggregate_load(self.probe.cpu_percent(), self.probe.memory_percent(), &stats);
        let status = derive_state(&load);
        let _ = tx.send(Message::WorkerStatus {
            worker_id,
            status,
            load,
            timestamp: epoch_secs(),
        });
    }

    fn task(&self) -> DeployTask {
        DeployTask::new(
            self.containers.clone(),
            self.repos.clone(),
            self.config.task.clone(),
        )
    }

    /// Deployment directories always land under this agent's own root,
    /// whatever path the orchestrator composed.
    fn slot_dir(&self, deployment_dir: &str, deployment_id: u64, replica_number: u32) -> PathBuf {
        let name = Path::new(deployment_dir)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| container_name(deployment_id, replica_number));
        self.config.deployment_root.join(name)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio::io::AsyncWriteExt;
    use tokio::net::TcpListener;

    use crate::drivers::{ContainerStats, RunSpec};
    use flotilla_proto::{ReplicaStatus, WorkerState};

    #[derive(Default)]
    struct FakeContainers {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ContainerDriver for FakeContainers {
        async fn build_image(&self, tag: &str, _dir: &Path) -> Result<()> {
            self.calls.lock().unwrap().push(format!("build {tag}"));
            Ok(())
        }
        async fn run_container(&self, spec: &RunSpec) -> Result<()> {
            self.calls.lock().unwrap().push(format!("run {}", spec.name));
            Ok(())
        }
        async fn stop_container(&self, _name: &str, _grace: Duration) -> Result<()> {
            Ok(())
        }
        async fn remove_container(&self, _name: &str, _force: bool) -> Result<()> {
            Ok(())
        }
        async fn remove_image(&self, _tag: &str) -> Result<()> {
            Ok(())
        }
        async fn stats(&self) -> Result<Vec<ContainerStats>> {
            Ok(vec![ContainerStats {
                name: "app-1-1".to_string(),
                cpu_percent: 12.0,
                memory_percent: 8.0,
            }])
        }
    }

    #[derive(Default)]
    struct FakeRepos;

    #[async_trait]
    impl RepoDriver for FakeRepos {
        async fn clone_shallow(&self, _url: &str, dest: &Path) -> Result<()> {
            tokio::fs::create_dir_all(dest).await?;
            Ok(())
        }
    }

    struct IdleProbe;

    impl SystemProbe for IdleProbe {
        fn cpu_percent(&self) -> f64 {
            5.0
        }
        fn memory_percent(&self) -> f64 {
            10.0
        }
    }

    async fn read_frame(
        lines: &mut tokio::io::Lines<BufReader<tokio::net::tcp::OwnedReadHalf>>,
    ) -> Message {
        let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .expect("frame timeout")
            .unwrap()
            .expect("connection closed");
        decode_line(&line).unwrap()
    }

    #[tokio::test]
    async fn agent_registers_deploys_and_reports() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::new(&addr.to_string(), "host-a");
        config.deployment_root = tmp.path().to_path_buf();
        config.telemetry_interval = Duration::from_millis(50);
        config.task.build_backoff = Duration::ZERO;

        let containers = Arc::new(FakeContainers::default());
        let agent = WorkerAgent::new(
            config,
            containers.clone(),
            Arc::new(FakeRepos),
            Arc::new(IdleProbe),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let agent_handle = tokio::spawn(async move { agent.run(shutdown_rx).await });

        // Orchestrator side of the link.
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        // 1. The first frame is the registration.
        let frame = read_frame(&mut lines).await;
        let Message::RegisterWorker { hostname, .. } = frame else {
            panic!("expected registerWorker, got {frame:?}");
        };
        assert_eq!(hostname, "host-a");

        write_half
            .write_all(
                encode_line(&Message::WorkerRegistered { id: 7 })
                    .unwrap()
                    .as_bytes(),
            )
            .await
            .unwrap();

        // 2. Dispatch a deploy task; the agent reports it active.
        write_half
            .write_all(
                encode_line(&Message::DeployRepository {
                    deployment_dir: "./deployments/app-3-1".to_string(),
                    repo_url: "https://github.com/acme/app.git".to_string(),
                    replica_id: 1,
                    deployment_id: 3,
                    deployment_time: 0,
                })
                .unwrap()
                .as_bytes(),
            )
            .await
            .unwrap();

        let status = loop {
            match read_frame(&mut lines).await {
                Message::DeploymentStatus {
                    worker_id,
                    deployment_id,
                    replica_id,
                    status,
                    port,
                    ..
                } => {
                    assert_eq!(worker_id, 7);
                    assert_eq!(deployment_id, 3);
                    assert_eq!(replica_id, 1);
                    assert_eq!(port, Some(8001));
                    break status;
                }
                Message::WorkerStatus { .. } => continue, // telemetry interleaves
                other => panic!("unexpected frame {other:?}"),
            }
        };
        assert_eq!(status, ReplicaStatus::Active);
        assert!(containers
            .calls
            .lock()
            .unwrap()
            .iter()
            .any(|c| c == "build app-3:1"));

        // 3. Telemetry carries the worker id and derived status.
        let status_frame = loop {
            if let Message::WorkerStatus {
                worker_id, status, load, ..
            } = read_frame(&mut lines).await
            {
                break (worker_id, status, load);
            }
        };
        assert_eq!(status_frame.0, 7);
        assert_eq!(status_frame.1, WorkerState::Active);
        assert_eq!(status_frame.2.running_containers, 1);

        // 4. Teardown round-trips as replicaRemoved.
        write_half
            .write_all(
                encode_line(&Message::RemoveReplica {
                    deployment_id: 3,
                    replica_id: 1,
                })
                .unwrap()
                .as_bytes(),
            )
            .await
            .unwrap();

        loop {
            if let Message::ReplicaRemoved {
                deployment_id,
                replica_id,
                ..
            } = read_frame(&mut lines).await
            {
                assert_eq!(deployment_id, 3);
                assert_eq!(replica_id, 1);
                break;
            }
        }

        shutdown_tx.send(true).unwrap();
        agent_handle.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn agent_reconnects_after_lost_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let tmp = tempfile::tempdir().unwrap();
        let mut config = AgentConfig::new(&addr.to_string(), "host-a");
        config.deployment_root = tmp.path().to_path_buf();
        config.reconnect_backoff = Duration::from_millis(20);

        let agent = WorkerAgent::new(
            config,
            Arc::new(FakeContainers::default()),
            Arc::new(FakeRepos),
            Arc::new(IdleProbe),
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let agent_handle = tokio::spawn(async move { agent.run(shutdown_rx).await });

        // First connection: read the registration, then drop the link.
        {
            let (stream, _) = listener.accept().await.unwrap();
            let (read_half, _write_half) = stream.into_split();
            let mut lines = BufReader::new(read_half).lines();
            let frame = read_frame(&mut lines).await;
            assert!(matches!(frame, Message::RegisterWorker { .. }));
        }

        // The agent comes back and registers again.
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, _write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();
        let frame = read_frame(&mut lines).await;
        assert!(matches!(frame, Message::RegisterWorker { .. }));

        shutdown_tx.send(true).unwrap();
        agent_handle.await.unwrap().unwrap();
    }
}
