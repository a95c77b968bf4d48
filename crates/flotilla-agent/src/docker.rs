//! Docker CLI driver.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::drivers::{ContainerDriver, ContainerStats, RunSpec};

/// Shells out to the `docker` binary.
#[derive(Debug, Clone, Default)]
pub struct DockerCli;

impl DockerCli {
    async fn docker(&self, args: &[&str]) -> Result<String> {
        debug!(?args, "docker");
        let output = Command::new("docker")
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .context("spawning docker")?;

        if !output.status.success() {
            bail!(
                "docker {} failed: {}",
                args.first().copied().unwrap_or_default(),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl ContainerDriver for DockerCli {
    async fn build_image(&self, tag: &str, context_dir: &Path) -> Result<()> {
        let dir = context_dir.to_string_lossy();
        self.docker(&["build", "-t", tag, dir.as_ref()]).await?;
        Ok(())
    }

    async fn run_container(&self, spec: &RunSpec) -> Result<()> {
        let port_env = format!("PORT={}", spec.port);
        let publish = format!("{0}:{0}", spec.port);
        let cpus = spec.cpus.to_string();
        let memory = format!("{}m", spec.memory_mib);

        self.docker(&[
            "run",
            "-d",
            "--name",
            &spec.name,
            "--restart",
            "unless-stopped",
            "--cpus",
            &cpus,
            "--memory",
            &memory,
            "-e",
            &port_env,
            "-p",
            &publish,
            &spec.image,
        ])
        .await?;
        Ok(())
    }

    async fn stop_container(&self, name: &str, grace: Duration) -> Result<()> {
        let timeout = grace.as_secs().to_string();
        self.docker(&["stop", "-t", &timeout, name]).await?;
        Ok(())
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        if force {
            self.docker(&["rm", "-f", name]).await?;
        } else {
            self.docker(&["rm", name]).await?;
        }
        Ok(())
    }

    async fn remove_image(&self, tag: &str) -> Result<()> {
        self.docker(&["rmi", tag]).await?;
        Ok(())
    }

    async fn stats(&self) -> Result<Vec<ContainerStats>> {
        let raw = self
            .docker(&[
                "stats",
                "--no-stream",
                "--format",
                "{{.Name}}|{{.CPUPerc}}|{{.MemPerc}}",
            ])
            .await?;
        Ok(parse_stats(&raw))
    }
}

/// Parse `docker stats` output lines of the form `name|12.34%|5.67%`.
/// Malformed lines are skipped.
fn parse_stats(raw: &str) -> Vec<ContainerStats> {
    raw.lines()
        .filter_map(|line| {
            let mut parts = line.trim().split('|');
            let name = parts.next()?.to_string();
            let cpu = parse_percent(parts.next()?)?;
            let memory = parse_percent(parts.next()?)?;
            Some(ContainerStats {
                name,
                cpu_percent: cpu,
                memory_percent: memory,
            })
        })
        .collect()
}

fn parse_percent(field: &str) -> Option<f64> {
    field.trim().trim_end_matches('%').parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_stats_lines() {
        let raw = "app-3-1|12.34%|5.67%\napp-3-2|0.00%|1.20%\n";
        let stats = parse_stats(raw);

        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "app-3-1");
        assert!((stats[0].cpu_percent - 12.34).abs() < f64::EPSILON);
        assert!((stats[1].memory_percent - 1.2).abs() < f64::EPSILON);
    }

    #[test]
    fn skips_malformed_lines() {
        let raw = "app-3-1|12.34%|5.67%\ngarbage\nname|not-a-number|1%\n";
        assert_eq!(parse_stats(raw).len(), 1);
    }

    #[test]
    fn empty_output_is_no_containers() {
        assert!(parse_stats("").is_empty());
    }
}
