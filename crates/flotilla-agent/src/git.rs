//! Git CLI driver.

use std::path::Path;
use std::process::Stdio;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::drivers::RepoDriver;

/// Shells out to the `git` binary.
#[derive(Debug, Clone, Default)]
pub struct GitCli;

#[async_trait]
impl RepoDriver for GitCli {
    async fn clone_shallow(&self, url: &str, dest: &Path) -> Result<()> {
        let dest_str = dest.to_string_lossy();
        debug!(%url, dest = %dest_str, "git clone");

        let output = Command::new("git")
            .args(["clone", "--depth", "1", url, dest_str.as_ref()])
            .stdin(Stdio::null())
            .output()
            .await
            .context("spawning git")?;

        if !output.status.success() {
            bail!(
                "git clone {url} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }
        Ok(())
    }
}
