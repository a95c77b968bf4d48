//! Repository reference canonicalization and existence checks.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{DeployError, DeployResult};

const GITHUB_WEB_PREFIX: &str = "https://github.com/";
const DEFAULT_API_BASE: &str = "https://api.github.com";
const VALIDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Existence oracle for `owner/name` repositories on the code host.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// True when the repository's metadata endpoint answers 2xx.
    /// Transport failures and timeouts are `InvalidRepository`.
    async fn repo_exists(&self, owner: &str, name: &str) -> DeployResult<bool>;
}

/// GitHub REST client probing `GET /repos/{owner}/{name}`.
pub struct GithubClient {
    http: reqwest::Client,
    api_base: String,
}

impl GithubClient {
    pub fn new() -> Self {
        Self::with_api_base(DEFAULT_API_BASE)
    }

    /// Point the probe at a different API base (for testing).
    pub fn with_api_base(api_base: &str) -> Self {
        let http = reqwest::Client::builder()
            .timeout(VALIDATE_TIMEOUT)
            .user_agent("flotilla")
            .build()
            // Builder only fails on TLS backend misconfiguration.
            .unwrap_or_default();

        Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        }
    }
}

impl Default for GithubClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RepoHost for GithubClient {
    async fn repo_exists(&self, owner: &str, name: &str) -> DeployResult<bool> {
        let url = format!("{}/repos/{owner}/{name}", self.api_base);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| DeployError::InvalidRepository(format!("{owner}/{name}: {e}")))?;

        debug!(%url, status = %response.status(), "repository probe");
        Ok(response.status().is_success())
    }
}

/// Reduce a user-supplied repository reference to `(owner, name)`.
///
/// Strips any number of leading `https://github.com/` prefixes and one
/// trailing `.git`. Idempotent: canonicalizing an already-canonical clone
/// URL yields the same pair.
pub fn canonicalize(user_ref: &str) -> DeployResult<(String, String)> {
    let mut rest = user_ref.trim();
    while let Some(stripped) = rest.strip_prefix(GITHUB_WEB_PREFIX) {
        rest = stripped;
    }
    let rest = rest.strip_suffix(".git").unwrap_or(rest);

    match rest.split_once('/') {
        Some((owner, name))
            if !owner.is_empty() && !name.is_empty() && !name.contains('/') =>
        {
            Ok((owner.to_string(), name.to_string()))
        }
        _ => Err(DeployError::InvalidRepository(format!(
            "cannot parse owner/name from {user_ref:?}"
        ))),
    }
}

/// Build the canonical clone URL for an `(owner, name)` pair.
pub fn clone_url(owner: &str, name: &str) -> String {
    format!("{GITHUB_WEB_PREFIX}{owner}/{name}.git")
}

/// Validates user references against a [`RepoHost`].
pub struct RepoValidator {
    host: Box<dyn RepoHost>,
}

impl RepoValidator {
    pub fn new(host: Box<dyn RepoHost>) -> Self {
        Self { host }
    }

    /// Resolve a user reference to its canonical clone URL, failing with
    /// `InvalidRepository` when the repository does not exist.
    pub async fn validate(&self, user_ref: &str) -> DeployResult<String> {
        let (owner, name) = canonicalize(user_ref)?;
        if !self.host.repo_exists(&owner, &name).await? {
            return Err(DeployError::InvalidRepository(format!(
                "{owner}/{name} not found on code host"
            )));
        }
        Ok(clone_url(&owner, &name))
    }
}
