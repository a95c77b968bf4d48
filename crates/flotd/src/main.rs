//! flotd — the flotilla daemon.
//!
//! Single binary with two modes:
//!
//! - **orchestrator** — state store, worker registry, deployment manager,
//!   scaling controller, fleet link, and the admin HTTP API
//! - **agent** — worker node that connects to an orchestrator, builds and
//!   runs replicas, and reports load
//!
//! # Usage
//!
//! ```text
//! flotd orchestrator --port 3000 --fleet-port 3001 --data-dir /var/lib/flotilla
//! flotd agent --main-server-url http://10.0.0.1:3000 --deployment-path /srv/deployments
//! ```
//!
//! Every flag can also come from the environment (`PORT`, `FLEET_PORT`,
//! `DATA_DIR`, `DEPLOYMENT_PATH`, `MAIN_SERVER_URL`, scaling tunables).

mod agent_mode;
mod orchestrator;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "flotd", about = "flotilla daemon")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the orchestrator: fleet link, scaling loop, and admin API.
    Orchestrator {
        /// Admin HTTP port.
        #[arg(long, env = "PORT", default_value = "3000")]
        port: u16,

        /// Worker transport port.
        #[arg(long, env = "FLEET_PORT", default_value = "3001")]
        fleet_port: u16,

        /// When set, persist state in `{data_dir}/flotilla.redb`;
        /// otherwise state is in-memory and dies with the process.
        #[arg(long, env = "DATA_DIR")]
        data_dir: Option<PathBuf>,

        /// Worker-side working root composed into deploy tasks.
        #[arg(long, env = "DEPLOYMENT_PATH", default_value = "./deployments")]
        deployment_path: String,

        /// Average-CPU scale-up threshold, percent.
        #[arg(long, env = "CPU_THRESHOLD", default_value = "70")]
        cpu_threshold: f64,

        /// Scaling tick interval in seconds.
        #[arg(long, env = "CHECK_INTERVAL_SECS", default_value = "30")]
        check_interval: u64,

        #[arg(long, env = "SCALE_UP_COOLDOWN_SECS", default_value = "300")]
        scale_up_cooldown: u64,

        #[arg(long, env = "SCALE_DOWN_COOLDOWN_SECS", default_value = "600")]
        scale_down_cooldown: u64,

        /// Heartbeat expiry for workers, in seconds.
        #[arg(long, env = "INACTIVE_TIMEOUT_SECS", default_value = "120")]
        inactive_timeout: u64,

        /// Inactivity sweep interval in seconds.
        #[arg(long, default_value = "30")]
        sweep_interval: u64,
    },

    /// Run a worker agent that joins an orchestrator's fleet.
    Agent {
        /// Orchestrator base URL; its host is used for the fleet link.
        #[arg(long, env = "MAIN_SERVER_URL", default_value = "http://localhost:3000")]
        main_server_url: String,

        /// Orchestrator fleet port.
        #[arg(long, env = "FLEET_PORT", default_value = "3001")]
        fleet_port: u16,

        /// Root for deployment working directories.
        #[arg(long, env = "DEPLOYMENT_PATH", default_value = "./deployments")]
        deployment_path: PathBuf,

        /// Advertised hostname; defaults to the OS hostname.
        #[arg(long)]
        hostname: Option<String>,

        /// Load report interval in seconds.
        #[arg(long, default_value = "15")]
        telemetry_interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,flotd=debug,flotilla=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Orchestrator {
            port,
            fleet_port,
            data_dir,
            deployment_path,
            cpu_threshold,
            check_interval,
            scale_up_cooldown,
            scale_down_cooldown,
            inactive_timeout,
            sweep_interval,
        } => {
            orchestrator::run(orchestrator::OrchestratorConfig {
                port,
                fleet_port,
                data_dir,
                deployment_path,
                cpu_threshold,
                check_interval,
                scale_up_cooldown,
                scale_down_cooldown,
                inactive_timeout,
                sweep_interval,
            })
            .await
        }
        Command::Agent {
            main_server_url,
            fleet_port,
            deployment_path,
            hostname,
            telemetry_interval,
        } => {
            agent_mode::run(
                main_server_url,
                fleet_port,
                deployment_path,
                hostname,
                telemetry_interval,
            )
            .await
        }
    }
}
