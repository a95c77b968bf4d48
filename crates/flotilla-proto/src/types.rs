//! Shared protocol value types.
//!
//! These appear both on the wire and inside persisted entity records, so
//! they live in the protocol crate rather than the state crate.

use serde::{Deserialize, Serialize};

/// Load report for a whole worker node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct WorkerLoad {
    /// CPU usage percentage (0–100).
    pub cpu_usage: f64,
    /// Memory usage percentage (0–100).
    pub memory_usage: f64,
    /// Number of containers currently running on the node.
    pub running_containers: u32,
}

/// Per-replica resource metrics reported with `deploymentStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ReplicaMetrics {
    pub cpu_usage: f64,
    pub memory_usage: f64,
}

/// Worker node status, derived from load thresholds on the agent side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Active,
    Busy,
    Overloaded,
    Inactive,
}

/// Lifecycle status of a single replica.
///
/// `Removing` is orchestrator-internal: it marks the window between a
/// scale-down decision and the worker's teardown confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    Pending,
    Active,
    Failed,
    Removing,
}

/// Lifecycle status of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentState {
    Deploying,
    Active,
    Failed,
}
