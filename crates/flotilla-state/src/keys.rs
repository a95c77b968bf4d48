//! Key schema for the flotilla state store.
//!
//! All storage keys are built here and nowhere else:
//!
//! - counters: `counter:worker`, `counter:deployment`, `counter:replica`
//! - entities: `worker:{id}`, `deployment:{id}`, `replica:{id}`
//! - sets: `workers`, `deployments`, `deployment:{id}:replicas`

/// Monotonic counter behind worker ids.
pub const COUNTER_WORKER: &str = "counter:worker";
/// Monotonic counter behind deployment ids.
pub const COUNTER_DEPLOYMENT: &str = "counter:deployment";
/// Monotonic counter behind replica ids.
pub const COUNTER_REPLICA: &str = "counter:replica";

/// Set of all worker entity keys.
pub const WORKERS_SET: &str = "workers";
/// Set of all deployment entity keys.
pub const DEPLOYMENTS_SET: &str = "deployments";

pub fn worker(id: u64) -> String {
    format!("worker:{id}")
}

pub fn deployment(id: u64) -> String {
    format!("deployment:{id}")
}

pub fn replica(id: u64) -> String {
    format!("replica:{id}")
}

/// Per-deployment set of replica entity keys.
pub fn deployment_replicas(deployment_id: u64) -> String {
    format!("deployment:{deployment_id}:replicas")
}
