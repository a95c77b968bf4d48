//! flotilla-deploy — repository validation and deployment lifecycle.
//!
//! Two pieces:
//!
//! - [`repo`] resolves a user-supplied repository reference to a canonical
//!   clone URL, confirming existence against the code host's metadata API
//! - [`manager`] creates deployments, distributes replicas to workers,
//!   applies status events from the fleet, and performs the add/remove
//!   actions the scaling controller decides on
//!
//! Failure contract: a create that cannot reach every chosen worker leaves
//! the deployment `failed` with its already-dispatched assignments in
//! place — no rollback is attempted, the operator resolves it.

pub mod error;
pub mod manager;
pub mod repo;

pub use error::{DeployError, DeployResult};
pub use manager::DeploymentManager;
pub use repo::{canonicalize, GithubClient, RepoHost, RepoValidator};
