//! Orchestrator mode — the platform's single logical coordinator.
//!
//! Assembly order: state store, registry, deployment manager, scaling
//! controller, fleet link, admin API. Background loops hang off one
//! shutdown watch channel; Ctrl-C drains everything.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

use flotilla_autoscale::{ScalerConfig, ScalingController};
use flotilla_deploy::{DeploymentManager, GithubClient, RepoValidator};
use flotilla_fleet::FleetServer;
use flotilla_registry::WorkerRegistry;
use flotilla_state::{Clock, StateStore, SystemClock};

pub struct OrchestratorConfig {
    pub port: u16,
    pub fleet_port: u16,
    pub data_dir: Option<PathBuf>,
    pub deployment_path: String,
    pub cpu_threshold: f64,
    pub check_interval: u64,
    pub scale_up_cooldown: u64,
    pub scale_down_cooldown: u64,
    pub inactive_timeout: u64,
    pub sweep_interval: u64,
}

/// The assembled orchestrator and its background tasks.
pub struct Orchestrator {
    state: StateStore,
    manager: Arc<DeploymentManager>,
    clock: Arc<dyn Clock>,
    config: OrchestratorConfig,
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Orchestrator {
    /// Build every subsystem and start the background loops.
    pub async fn init(config: OrchestratorConfig) -> anyhow::Result<Self> {
        info!("flotilla orchestrator starting");

        // ── State store ──────────────────────────────────────────
        let state = match &config.data_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                let db_path = dir.join("flotilla.redb");
                info!(path = ?db_path, "durable state store");
                StateStore::open(&db_path)?
            }
            None => {
                info!("in-memory state store");
                StateStore::in_memory()
            }
        };

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        // ── Registry ─────────────────────────────────────────────
        let registry = Arc::new(
            WorkerRegistry::new(state.clone(), clock.clone())
                .with_inactive_timeout(Duration::from_secs(config.inactive_timeout)),
        );

        // ── Deployment manager ───────────────────────────────────
        let manager = Arc::new(
            DeploymentManager::new(
                state.clone(),
                registry.clone(),
                RepoValidator::new(Box::new(GithubClient::new())),
                clock.clone(),
            )
            .with_deployment_root(&config.deployment_path),
        );

        // ── Scaling controller ───────────────────────────────────
        let controller = ScalingController::new(
            state.clone(),
            manager.clone(),
            clock.clone(),
            ScalerConfig {
                check_interval: Duration::from_secs(config.check_interval),
                cpu_threshold: config.cpu_threshold,
                scale_up_cooldown: Duration::from_secs(config.scale_up_cooldown),
                scale_down_cooldown: Duration::from_secs(config.scale_down_cooldown),
            },
        );

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut handles = Vec::new();

        // Scaling loop.
        let controller_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            controller.run(controller_shutdown).await;
        }));

        // Worker inactivity sweep.
        let sweeper_registry = registry.clone();
        let sweeper_shutdown = shutdown_rx.clone();
        let sweep_interval = Duration::from_secs(config.sweep_interval);
        handles.push(tokio::spawn(async move {
            sweeper_registry
                .run_sweeper(sweep_interval, sweeper_shutdown)
                .await;
        }));

        // Fleet link.
        let fleet_addr = SocketAddr::from(([0, 0, 0, 0], config.fleet_port));
        let fleet_listener = tokio::net::TcpListener::bind(fleet_addr).await?;
        let fleet = Arc::new(FleetServer::new(registry.clone(), manager.clone()));
        let fleet_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            fleet.run(fleet_listener, fleet_shutdown).await;
        }));

        Ok(Self {
            state,
            manager,
            clock,
            config,
            shutdown_tx,
            handles,
        })
    }

    /// Serve the admin API until Ctrl-C, then drain the background loops.
    pub async fn run(self) -> anyhow::Result<()> {
        let router = flotilla_api::build_router(
            self.state.clone(),
            self.manager.clone(),
            self.clock.clone(),
        );
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.port));
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(%addr, "admin API listening");

        let shutdown_tx = self.shutdown_tx.clone();
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::signal::ctrl_c()
                    .await
                    .expect("failed to install CTRL+C handler");
                info!("shutdown signal received");
                let _ = shutdown_tx.send(true);
            })
            .await?;

        self.shutdown().await;
        Ok(())
    }

    /// Stop the background loops and wait for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("orchestrator stopped");
    }
}

pub async fn run(config: OrchestratorConfig) -> anyhow::Result<()> {
    let orchestrator = Orchestrator::init(config).await?;
    orchestrator.run().await
}
