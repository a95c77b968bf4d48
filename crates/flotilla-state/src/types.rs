//! Persisted entity records.
//!
//! All records are JSON-serialized into the key-value backend under the
//! schema in [`crate::keys`]. Identifiers are monotonic integers issued
//! by the store's counters.

use serde::{Deserialize, Serialize};

use flotilla_proto::{DeploymentState, ReplicaMetrics, ReplicaStatus, WorkerLoad, WorkerState};

/// A registered worker node.
///
/// Created on first registration, refreshed on every `workerStatus`,
/// removed on disconnect or by the inactivity sweep. The transport-level
/// routing handle is deliberately not part of the record; reconnection
/// replaces the handle without minting a new id for the same hostname.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub id: u64,
    /// Stable identity across reconnects.
    pub hostname: String,
    pub status: WorkerState,
    /// Unix timestamp of the last frame received from this worker.
    pub last_heartbeat: u64,
    pub load: WorkerLoad,
}

/// Where one replica of a deployment lives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    pub worker_id: u64,
    /// Dense, 1-based, unique within the deployment.
    pub replica_number: u32,
    pub status: ReplicaStatus,
}

/// The logical record of "run repository R as N–M replicas".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: u64,
    /// Canonical clone URL.
    pub repo_ref: String,
    pub owner: String,
    pub min_replicas: u32,
    pub max_replicas: u32,
    pub status: DeploymentState,
    /// Unix timestamp of the last scale-up, if any.
    pub last_scale_up: Option<u64>,
    /// Unix timestamp of the last scale-down, if any.
    pub last_scale_down: Option<u64>,
    /// Ordered by `replica_number`; the tail is what scale-down removes.
    pub assignments: Vec<Assignment>,
    pub created_at: u64,
}

impl DeploymentRecord {
    /// The next replica number to assign (dense, 1-based).
    pub fn next_replica_number(&self) -> u32 {
        self.assignments.len() as u32 + 1
    }
}

/// One running (or pending) instance of a deployment on one worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicaRecord {
    pub id: u64,
    pub deployment_id: u64,
    pub replica_number: u32,
    pub status: ReplicaStatus,
    pub metrics: ReplicaMetrics,
    pub created_at: u64,
}
