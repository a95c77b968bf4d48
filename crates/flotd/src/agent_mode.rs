//! Agent mode — runs on worker nodes.
//!
//! Wires the real drivers (docker, git, libc probe) into the worker agent
//! and keeps it connected to the orchestrator until Ctrl-C.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use flotilla_agent::docker::DockerCli;
use flotilla_agent::git::GitCli;
use flotilla_agent::telemetry::LibcProbe;
use flotilla_agent::{AgentConfig, WorkerAgent};

pub async fn run(
    main_server_url: String,
    fleet_port: u16,
    deployment_path: PathBuf,
    hostname: Option<String>,
    telemetry_interval: u64,
) -> anyhow::Result<()> {
    let host = server_host(&main_server_url);
    let server_addr = format!("{host}:{fleet_port}");
    let hostname = hostname.unwrap_or_else(os_hostname);

    info!(%server_addr, %hostname, "flotilla agent starting");
    std::fs::create_dir_all(&deployment_path)?;

    let mut config = AgentConfig::new(&server_addr, &hostname);
    config.deployment_root = deployment_path;
    config.telemetry_interval = Duration::from_secs(telemetry_interval);

    let agent = WorkerAgent::new(
        config,
        Arc::new(DockerCli),
        Arc::new(GitCli),
        Arc::new(LibcProbe),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let agent_handle = tokio::spawn(async move { agent.run(shutdown_rx).await });

    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C handler");
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    agent_handle.await??;
    info!("agent stopped");
    Ok(())
}

/// Pull the host out of a base URL like `http://10.0.0.1:3000`.
fn server_host(url: &str) -> String {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url);
    let rest = rest.split('/').next().unwrap_or(rest);
    rest.split(':').next().unwrap_or(rest).to_string()
}

/// The OS hostname, or `worker` if it cannot be read.
fn os_hostname() -> String {
    let mut buf = [0u8; 256];
    let rc = unsafe { libc::gethostname(buf.as_mut_ptr().cast(), buf.len()) };
    if rc != 0 {
        return "worker".to_string();
    }
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}
