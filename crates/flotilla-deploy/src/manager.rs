//! Deployment lifecycle management.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use flotilla_placement::{find_one, select_workers};
use flotilla_proto::{DeploymentState, Message, ReplicaMetrics, ReplicaStatus};
use flotilla_registry::WorkerRegistry;
use flotilla_state::{
    Assignment, Clock, DeploymentRecord, ReplicaRecord, StateError, StateStore,
};

use crate::error::{DeployError, DeployResult};
use crate::repo::RepoValidator;

/// Per-deployment write locks.
///
/// Every read-modify-write of a `DeploymentRecord` (and its replicas)
/// runs under that deployment's lock, held across the whole cycle.
/// Status events from different worker connections and scaling actions
/// therefore cannot interleave on one deployment and overwrite each
/// other's updates.
#[derive(Default)]
struct DeploymentLocks {
    inner: Mutex<HashMap<u64, Arc<AsyncMutex<()>>>>,
}

impl DeploymentLocks {
    fn for_deployment(&self, deployment_id: u64) -> Arc<AsyncMutex<()>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.entry(deployment_id).or_default().clone()
    }

    fn forget(&self, deployment_id: u64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.remove(&deployment_id);
    }
}

/// Creates deployments, applies fleet status events, and executes the
/// add/remove actions decided by the scaling controller.
///
/// Every mutating operation re-reads its deployment from the state store
/// under the per-deployment lock; nothing held across an await outside
/// the lock is trusted to still be current.
pub struct DeploymentManager {
    state: StateStore,
    registry: Arc<WorkerRegistry>,
    validator: RepoValidator,
    clock: Arc<dyn Clock>,
    deployment_root: String,
    locks: DeploymentLocks,
}

impl DeploymentManager {
    pub fn new(
        state: StateStore,
        registry: Arc<WorkerRegistry>,
        validator: RepoValidator,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            state,
            registry,
            validator,
            clock,
            deployment_root: "./deployments".to_string(),
            locks: DeploymentLocks::default(),
        }
    }

    /// Override the worker-side working root sent with deploy tasks.
    pub fn with_deployment_root(mut self, root: &str) -> Self {
        self.deployment_root = root.trim_end_matches('/').to_string();
        self
    }

    fn deployment_dir(&self, deployment_id: u64, replica_number: u32) -> String {
        format!(
            "{}/app-{deployment_id}-{replica_number}",
            self.deployment_root
        )
    }

    fn dispatch_deploy(
        &self,
        worker_id: u64,
        deployment_id: u64,
        replica_number: u32,
        repo_url: &str,
    ) -> DeployResult<()> {
        self.registry.route_to(
            worker_id,
            Message::DeployRepository {
                deployment_dir: self.deployment_dir(deployment_id, replica_number),
                repo_url: repo_url.to_string(),
                replica_id: replica_number,
                deployment_id,
                deployment_time: self.clock.epoch_secs(),
            },
        )?;
        Ok(())
    }

    async fn require_deployment(&self, id: u64) -> DeployResult<DeploymentRecord> {
        self.state
            .get_deployment(id)
            .await?
            .ok_or_else(|| DeployError::State(StateError::NotFound(format!("deployment:{id}"))))
    }

    // ── Create ─────────────────────────────────────────────────────

    /// Create a deployment and distribute its initial replicas.
    ///
    /// Validation and placement happen before anything is persisted, so a
    /// rejected request leaves no entities behind. Once dispatching starts
    /// there is no rollback: an unreachable worker flips the deployment to
    /// `failed` and the already-delivered tasks stand.
    pub async fn create(
        &self,
        repo_ref: &str,
        owner: &str,
        min_replicas: u32,
        max_replicas: u32,
    ) -> DeployResult<DeploymentRecord> {
        if min_replicas < 1 || min_replicas > max_replicas {
            return Err(DeployError::InvalidReplicaBounds {
                min: min_replicas,
                max: max_replicas,
            });
        }

        let repo_url = self.validator.validate(repo_ref).await?;

        let fleet = self.state.list_workers().await?;
        let mut chosen = select_workers(&fleet, max_replicas as usize);
        if (chosen.len() as u32) < min_replicas {
            return Err(DeployError::InsufficientWorkers {
                needed: min_replicas,
                found: chosen.len() as u32,
            });
        }
        chosen.truncate(min_replicas as usize);

        let id = self.state.next_deployment_id().await?;
        let now = self.clock.epoch_secs();

        // Workers can start reporting as soon as the first task lands, so
        // the lock covers everything from first persist to the final flip.
        let lock = self.locks.for_deployment(id);
        let _guard = lock.lock().await;

        let assignments: Vec<Assignment> = chosen
            .iter()
            .enumerate()
            .map(|(i, worker)| Assignment {
                worker_id: worker.id,
                replica_number: i as u32 + 1,
                status: ReplicaStatus::Pending,
            })
            .collect();

        let mut deployment = DeploymentRecord {
            id,
            repo_ref: repo_url.clone(),
            owner: owner.to_string(),
            min_replicas,
            max_replicas,
            status: DeploymentState::Deploying,
            last_scale_up: None,
            last_scale_down: None,
            assignments,
            created_at: now,
        };
        self.state.put_deployment(&deployment).await?;

        for assignment in &deployment.assignments {
            let replica = ReplicaRecord {
                id: self.state.next_replica_id().await?,
                deployment_id: id,
                replica_number: assignment.replica_number,
                status: ReplicaStatus::Pending,
                metrics: ReplicaMetrics::default(),
                created_at: now,
            };
            self.state.put_replica(&replica).await?;
        }

        for assignment in &deployment.assignments {
            if let Err(e) = self.dispatch_deploy(
                assignment.worker_id,
                id,
                assignment.replica_number,
                &repo_url,
            ) {
                warn!(
                    deployment_id = id,
                    worker_id = assignment.worker_id,
                    error = %e,
                    "dispatch failed, marking deployment failed"
                );
                deployment.status = DeploymentState::Failed;
                self.state.put_deployment(&deployment).await?;
                return Err(e);
            }
        }

        deployment.status = DeploymentState::Active;
        self.state.put_deployment(&deployment).await?;

        info!(
            deployment_id = id,
            repo = %repo_url,
            replicas = deployment.assignments.len(),
            "deployment created"
        );
        Ok(deployment)
    }

    // ── Fleet status events ────────────────────────────────────────

    /// Apply a `deploymentStatus` frame: update the matching assignment
    /// and replica. Frames for unknown deployments are dropped.
    pub async fn apply_deployment_status(
        &self,
        worker_id: u64,
        deployment_id: u64,
        replica_number: u32,
        status: ReplicaStatus,
        metrics: Option<ReplicaMetrics>,
    ) -> DeployResult<()> {
        let lock = self.locks.for_deployment(deployment_id);
        let _guard = lock.lock().await;

        let Some(mut deployment) = self.state.get_deployment(deployment_id).await? else {
            warn!(deployment_id, worker_id, "status for unknown deployment");
            return Ok(());
        };

        if let Some(assignment) = deployment
            .assignments
            .iter_mut()
            .find(|a| a.replica_number == replica_number)
        {
            assignment.status = status;
        }
        self.state.put_deployment(&deployment).await?;

        let replicas = self.state.list_replicas(deployment_id).await?;
        if let Some(mut replica) = replicas
            .into_iter()
            .find(|r| r.replica_number == replica_number)
        {
            replica.status = status;
            if let Some(metrics) = metrics {
                replica.metrics = metrics;
            }
            self.state.put_replica(&replica).await?;
        }

        debug!(
            deployment_id,
            replica_number,
            ?status,
            "applied deployment status"
        );
        Ok(())
    }

    /// Apply a `replicaRemoved` confirmation.
    ///
    /// Scale-down already deleted the replica entity; this only clears a
    /// leftover in the `removing` window, e.g. after a crash between the
    /// teardown order and the delete.
    pub async fn apply_replica_removed(
        &self,
        deployment_id: u64,
        replica_number: u32,
    ) -> DeployResult<()> {
        let lock = self.locks.for_deployment(deployment_id);
        let _guard = lock.lock().await;

        let replicas = self.state.list_replicas(deployment_id).await?;
        if let Some(replica) = replicas
            .iter()
            .find(|r| r.replica_number == replica_number && r.status == ReplicaStatus::Removing)
        {
            self.state.delete_replica(deployment_id, replica.id).await?;
        }
        debug!(deployment_id, replica_number, "replica removal confirmed");
        Ok(())
    }

    // ── Scaling actions ────────────────────────────────────────────

    /// Add one replica at the tail. Returns false when no worker is
    /// eligible or the deployment is already at `max_replicas`.
    pub async fn scale_up(&self, deployment_id: u64) -> DeployResult<bool> {
        let lock = self.locks.for_deployment(deployment_id);
        let _guard = lock.lock().await;

        let mut deployment = self.require_deployment(deployment_id).await?;
        if deployment.assignments.len() as u32 >= deployment.max_replicas {
            return Ok(false);
        }

        let fleet = self.state.list_workers().await?;
        let Some(worker) = find_one(&fleet) else {
            warn!(deployment_id, "scale-up skipped: no eligible worker");
            return Ok(false);
        };

        let replica_number = deployment.next_replica_number();
        let now = self.clock.epoch_secs();

        let replica = ReplicaRecord {
            id: self.state.next_replica_id().await?,
            deployment_id,
            replica_number,
            status: ReplicaStatus::Pending,
            metrics: ReplicaMetrics::default(),
            created_at: now,
        };
        self.state.put_replica(&replica).await?;

        deployment.assignments.push(Assignment {
            worker_id: worker.id,
            replica_number,
            status: ReplicaStatus::Pending,
        });
        self.state.put_deployment(&deployment).await?;

        self.dispatch_deploy(worker.id, deployment_id, replica_number, &deployment.repo_ref)?;

        deployment.last_scale_up = Some(now);
        self.state.put_deployment(&deployment).await?;

        info!(
            deployment_id,
            replica_number,
            worker_id = worker.id,
            "scaled up"
        );
        Ok(true)
    }

    /// Remove the tail replica. Returns false when already at
    /// `min_replicas`.
    pub async fn scale_down(&self, deployment_id: u64) -> DeployResult<bool> {
        let lock = self.locks.for_deployment(deployment_id);
        let _guard = lock.lock().await;

        let mut deployment = self.require_deployment(deployment_id).await?;
        if deployment.assignments.len() as u32 <= deployment.min_replicas {
            return Ok(false);
        }
        let Some(tail) = deployment.assignments.pop() else {
            return Ok(false);
        };

        // Mark the replica `removing` for the window between the teardown
        // order and the delete below.
        let replicas = self.state.list_replicas(deployment_id).await?;
        let tail_replica = replicas
            .into_iter()
            .find(|r| r.replica_number == tail.replica_number);
        if let Some(mut replica) = tail_replica.clone() {
            replica.status = ReplicaStatus::Removing;
            self.state.put_replica(&replica).await?;
        }

        // A dead worker has nothing left to tear down; proceed.
        if let Err(e) = self.registry.route_to(
            tail.worker_id,
            Message::RemoveReplica {
                deployment_id,
                replica_id: tail.replica_number,
            },
        ) {
            warn!(
                deployment_id,
                worker_id = tail.worker_id,
                error = %e,
                "teardown order undeliverable"
            );
        }

        if let Some(replica) = tail_replica {
            self.state.delete_replica(deployment_id, replica.id).await?;
        }

        deployment.last_scale_down = Some(self.clock.epoch_secs());
        self.state.put_deployment(&deployment).await?;

        info!(
            deployment_id,
            replica_number = tail.replica_number,
            worker_id = tail.worker_id,
            "scaled down"
        );
        Ok(true)
    }

    // ── Operator actions ───────────────────────────────────────────

    /// Re-dispatch every assignment of a deployment (push webhook).
    /// Returns how many deploy tasks were delivered.
    pub async fn redeploy(&self, deployment_id: u64) -> DeployResult<u32> {
        let deployment = self.require_deployment(deployment_id).await?;
        let mut delivered = 0;

        for assignment in &deployment.assignments {
            match self.dispatch_deploy(
                assignment.worker_id,
                deployment_id,
                assignment.replica_number,
                &deployment.repo_ref,
            ) {
                Ok(()) => delivered += 1,
                Err(e) => warn!(
                    deployment_id,
                    worker_id = assignment.worker_id,
                    error = %e,
                    "redeploy dispatch failed"
                ),
            }
        }

        info!(deployment_id, delivered, "redeploy dispatched");
        Ok(delivered)
    }

    /// Tear down and delete a deployment. Returns false if it did not
    /// exist. Unreachable workers are skipped; their containers die with
    /// the host.
    pub async fn remove_deployment(&self, deployment_id: u64) -> DeployResult<bool> {
        let lock = self.locks.for_deployment(deployment_id);
        let _guard = lock.lock().await;

        let Some(deployment) = self.state.get_deployment(deployment_id).await? else {
            return Ok(false);
        };

        for assignment in &deployment.assignments {
            if let Err(e) = self.registry.route_to(
                assignment.worker_id,
                Message::RemoveReplica {
                    deployment_id,
                    replica_id: assignment.replica_number,
                },
            ) {
                warn!(
                    deployment_id,
                    worker_id = assignment.worker_id,
                    error = %e,
                    "teardown order undeliverable"
                );
            }
        }

        self.state
            .delete_replicas_for_deployment(deployment_id)
            .await?;
        self.state.delete_deployment(deployment_id).await?;
        drop(_guard);
        self.locks.forget(deployment_id);
        info!(deployment_id, "deployment removed");
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flotilla_proto::{WorkerLoad, WorkerState};
    use flotilla_registry::RoutingHandle;
    use flotilla_state::ManualClock;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    use crate::repo::RepoHost;

    struct AlwaysExists;

    #[async_trait]
    impl RepoHost for AlwaysExists {
        async fn repo_exists(&self, _owner: &str, _name: &str) -> DeployResult<bool> {
            Ok(true)
        }
    }

    struct Harness {
        state: StateStore,
        registry: Arc<WorkerRegistry>,
        manager: DeploymentManager,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let state = StateStore::in_memory();
        let clock = Arc::new(ManualClock::new(1000));
        let registry = Arc::new(WorkerRegistry::new(state.clone(), clock.clone()));
        let manager = DeploymentManager::new(
            state.clone(),
            registry.clone(),
            RepoValidator::new(Box::new(AlwaysExists)),
            clock.clone(),
        );
        Harness {
            state,
            registry,
            manager,
            clock,
        }
    }

    async fn connect_worker(
        h: &Harness,
        conn_id: u64,
        hostname: &str,
    ) -> (u64, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = h
            .registry
            .register(hostname, RoutingHandle { conn_id, tx })
            .await
            .unwrap();
        (id, rx)
    }

    async fn set_cpu(h: &Harness, worker_id: u64, cpu: f64) {
        h.registry
            .update_status(
                worker_id,
                WorkerState::Active,
                WorkerLoad {
                    cpu_usage: cpu,
                    memory_usage: 10.0,
                    running_containers: 0,
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn create_distributes_min_replicas() {
        let h = harness();
        let (w1, mut rx1) = connect_worker(&h, 1, "host-a").await;
        h.clock.advance(1);
        let (w2, mut rx2) = connect_worker(&h, 2, "host-b").await;

        let deployment = h.manager.create("acme/app", "ops", 2, 4).await.unwrap();

        assert_eq!(deployment.status, DeploymentState::Active);
        assert_eq!(deployment.repo_ref, "https://github.com/acme/app.git");
        let numbers: Vec<u32> = deployment
            .assignments
            .iter()
            .map(|a| a.replica_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(deployment.assignments[0].worker_id, w1);
        assert_eq!(deployment.assignments[1].worker_id, w2);

        // Both workers received a deploy task.
        let m1 = rx1.try_recv().unwrap();
        assert!(matches!(
            m1,
            Message::DeployRepository { replica_id: 1, .. }
        ));
        assert!(matches!(
            rx2.try_recv().unwrap(),
            Message::DeployRepository { replica_id: 2, .. }
        ));

        // Pending replica entities persisted.
        let replicas = h.state.list_replicas(deployment.id).await.unwrap();
        assert_eq!(replicas.len(), 2);
        assert!(replicas.iter().all(|r| r.status == ReplicaStatus::Pending));
    }

    #[tokio::test]
    async fn create_rejects_bad_replica_bounds() {
        let h = harness();
        assert!(matches!(
            h.manager.create("acme/app", "ops", 0, 3).await,
            Err(DeployError::InvalidReplicaBounds { .. })
        ));
        assert!(matches!(
            h.manager.create("acme/app", "ops", 3, 2).await,
            Err(DeployError::InvalidReplicaBounds { .. })
        ));
    }

    #[tokio::test]
    async fn create_fails_when_fleet_is_hot() {
        let h = harness();
        let (w1, _rx1) = connect_worker(&h, 1, "host-a").await;
        let (w2, _rx2) = connect_worker(&h, 2, "host-b").await;
        set_cpu(&h, w1, 85.0).await;
        set_cpu(&h, w2, 85.0).await;

        let err = h.manager.create("acme/app", "ops", 1, 3).await;
        assert!(matches!(
            err,
            Err(DeployError::InsufficientWorkers { needed: 1, found: 0 })
        ));

        // Nothing persisted.
        assert!(h.state.list_deployments().await.unwrap().is_empty());
        assert!(h.state.list_replicas(1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_marks_failed_on_unreachable_worker() {
        let h = harness();
        let (_w1, rx1) = connect_worker(&h, 1, "host-a").await;
        drop(rx1); // Connection dies between selection and dispatch.

        let err = h.manager.create("acme/app", "ops", 1, 2).await;
        assert!(matches!(err, Err(DeployError::WorkerUnreachable(_))));

        // The deployment stands, failed, with its assignments intact.
        let deployments = h.state.list_deployments().await.unwrap();
        assert_eq!(deployments.len(), 1);
        assert_eq!(deployments[0].status, DeploymentState::Failed);
        assert_eq!(deployments[0].assignments.len(), 1);
    }

    #[tokio::test]
    async fn status_event_updates_assignment_and_replica() {
        let h = harness();
        let (w1, _rx1) = connect_worker(&h, 1, "host-a").await;
        let deployment = h.manager.create("acme/app", "ops", 1, 2).await.unwrap();

        let metrics = ReplicaMetrics {
            cpu_usage: 33.0,
            memory_usage: 21.0,
        };
        h.manager
            .apply_deployment_status(w1, deployment.id, 1, ReplicaStatus::Active, Some(metrics))
            .await
            .unwrap();

        let stored = h.state.get_deployment(deployment.id).await.unwrap().unwrap();
        assert_eq!(stored.assignments[0].status, ReplicaStatus::Active);

        let replicas = h.state.list_replicas(deployment.id).await.unwrap();
        assert_eq!(replicas[0].status, ReplicaStatus::Active);
        assert_eq!(replicas[0].metrics, metrics);
    }

    #[tokio::test]
    async fn status_event_for_unknown_deployment_is_dropped() {
        let h = harness();
        h.manager
            .apply_deployment_status(1, 999, 1, ReplicaStatus::Active, None)
            .await
            .unwrap();
        assert!(h.state.list_deployments().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn scale_up_appends_next_replica_number() {
        let h = harness();
        let (_w1, mut rx1) = connect_worker(&h, 1, "host-a").await;
        let deployment = h.manager.create("acme/app", "ops", 1, 3).await.unwrap();
        let _ = rx1.try_recv();

        h.clock.advance(60);
        assert!(h.manager.scale_up(deployment.id).await.unwrap());

        let stored = h.state.get_deployment(deployment.id).await.unwrap().unwrap();
        assert_eq!(stored.assignments.len(), 2);
        assert_eq!(stored.assignments[1].replica_number, 2);
        assert_eq!(stored.last_scale_up, Some(1060));

        assert!(matches!(
            rx1.try_recv().unwrap(),
            Message::DeployRepository { replica_id: 2, .. }
        ));
        assert_eq!(h.state.list_replicas(deployment.id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn scale_up_respects_max_replicas() {
        let h = harness();
        let (_w1, _rx1) = connect_worker(&h, 1, "host-a").await;
        let deployment = h.manager.create("acme/app", "ops", 1, 1).await.unwrap();

        assert!(!h.manager.scale_up(deployment.id).await.unwrap());
    }

    #[tokio::test]
    async fn scale_down_removes_tail_and_deletes_replica() {
        let h = harness();
        let (_w1, mut rx1) = connect_worker(&h, 1, "host-a").await;
        h.clock.advance(1);
        let (_w2, _rx2) = connect_worker(&h, 2, "host-b").await;
        h.clock.advance(1);
        let (w3, mut rx3) = connect_worker(&h, 3, "host-c").await;

        let deployment = h.manager.create("acme/app", "ops", 3, 4).await.unwrap();
        let _ = rx1.try_recv();

        h.clock.advance(100);
        assert!(h.manager.scale_down(deployment.id).await.unwrap());

        let stored = h.state.get_deployment(deployment.id).await.unwrap().unwrap();
        let numbers: Vec<u32> = stored.assignments.iter().map(|a| a.replica_number).collect();
        assert_eq!(numbers, vec![1, 2]);
        assert_eq!(stored.last_scale_down, Some(1102));

        // The tail's worker got the teardown order.
        assert_eq!(stored.assignments.iter().find(|a| a.worker_id == w3), None);
        assert!(matches!(
            rx3.try_recv().unwrap(),
            Message::RemoveReplica { replica_id: 3, .. }
        ));

        // Replica 3 is gone from the store.
        let replicas = h.state.list_replicas(deployment.id).await.unwrap();
        let left: Vec<u32> = replicas.iter().map(|r| r.replica_number).collect();
        assert_eq!(left, vec![1, 2]);
    }

    #[tokio::test]
    async fn scale_down_stops_at_min_replicas() {
        let h = harness();
        let (_w1, _rx1) = connect_worker(&h, 1, "host-a").await;
        let deployment = h.manager.create("acme/app", "ops", 1, 3).await.unwrap();

        assert!(!h.manager.scale_down(deployment.id).await.unwrap());
    }

    #[tokio::test]
    async fn redeploy_redispatches_all_assignments() {
        let h = harness();
        let (_w1, mut rx1) = connect_worker(&h, 1, "host-a").await;
        let deployment = h.manager.create("acme/app", "ops", 1, 2).await.unwrap();
        let _ = rx1.try_recv();

        let delivered = h.manager.redeploy(deployment.id).await.unwrap();
        assert_eq!(delivered, 1);
        assert!(matches!(
            rx1.try_recv().unwrap(),
            Message::DeployRepository { replica_id: 1, .. }
        ));
    }

    #[tokio::test]
    async fn remove_deployment_tears_down_everything() {
        let h = harness();
        let (_w1, mut rx1) = connect_worker(&h, 1, "host-a").await;
        let deployment = h.manager.create("acme/app", "ops", 1, 2).await.unwrap();
        let _ = rx1.try_recv();

        assert!(h.manager.remove_deployment(deployment.id).await.unwrap());
        assert!(matches!(
            rx1.try_recv().unwrap(),
            Message::RemoveReplica { replica_id: 1, .. }
        ));
        assert!(h.state.get_deployment(deployment.id).await.unwrap().is_none());
        assert!(h.state.list_replicas(deployment.id).await.unwrap().is_empty());

        assert!(!h.manager.remove_deployment(deployment.id).await.unwrap());
    }

    #[tokio::test]
    async fn concurrent_status_events_do_not_lose_updates() {
        let h = harness();
        let (w1, _rx1) = connect_worker(&h, 1, "host-a").await;
        h.clock.advance(1);
        let (w2, _rx2) = connect_worker(&h, 2, "host-b").await;

        let deployment = h.manager.create("acme/app", "ops", 2, 4).await.unwrap();

        // Both workers report their replica active at the same instant,
        // from what would be two different connection tasks.
        let (first, second) = tokio::join!(
            h.manager
                .apply_deployment_status(w1, deployment.id, 1, ReplicaStatus::Active, None),
            h.manager
                .apply_deployment_status(w2, deployment.id, 2, ReplicaStatus::Active, None),
        );
        first.unwrap();
        second.unwrap();

        let stored = h.state.get_deployment(deployment.id).await.unwrap().unwrap();
        assert!(stored
            .assignments
            .iter()
            .all(|a| a.status == ReplicaStatus::Active));
    }

    #[tokio::test]
    async fn concurrent_scale_ups_keep_replica_numbers_dense() {
        let h = harness();
        let (_w1, _rx1) = connect_worker(&h, 1, "host-a").await;
        let deployment = h.manager.create("acme/app", "ops", 1, 3).await.unwrap();

        let (first, second) = tokio::join!(
            h.manager.scale_up(deployment.id),
            h.manager.scale_up(deployment.id),
        );
        assert!(first.unwrap());
        assert!(second.unwrap());

        let stored = h.state.get_deployment(deployment.id).await.unwrap().unwrap();
        let numbers: Vec<u32> = stored.assignments.iter().map(|a| a.replica_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(h.state.list_replicas(deployment.id).await.unwrap().len(), 3);
    }
}
