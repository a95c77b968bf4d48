//! flotilla-agent — the worker-node side of the platform.
//!
//! Runs on every worker host. Maintains a persistent connection to the
//! orchestrator (reconnecting with a fixed backoff), executes deploy
//! tasks, and reports load every 15 seconds.
//!
//! Container and version-control tooling are reached through the
//! [`drivers`] traits; the shipped implementations shell out to `docker`
//! and `git`, and tests substitute fakes. A deploy task is a small state
//! machine (`cloning → building → running → reporting`) that always runs
//! its cleanup step first, so a crashed or re-dispatched task never trips
//! over leftovers of its own `(deployment, replica)` slot.

pub mod agent;
pub mod docker;
pub mod drivers;
pub mod git;
pub mod task;
pub mod telemetry;

pub use agent::{AgentConfig, WorkerAgent};
pub use drivers::{ContainerDriver, ContainerStats, RepoDriver, RunSpec};
pub use task::{DeployTask, TaskConfig, TaskOutcome};
