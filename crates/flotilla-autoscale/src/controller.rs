//! The scaling controller and its decision function.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use flotilla_deploy::DeploymentManager;
use flotilla_proto::{DeploymentState, ReplicaStatus};
use flotilla_state::{Clock, DeploymentRecord, ReplicaRecord, StateStore};

/// Scaling tunables. Defaults: 30 s tick, threshold 70 %, cooldowns
/// 300 s up / 600 s down.
#[derive(Debug, Clone)]
pub struct ScalerConfig {
    pub check_interval: Duration,
    pub cpu_threshold: f64,
    pub scale_up_cooldown: Duration,
    pub scale_down_cooldown: Duration,
}

impl Default for ScalerConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(30),
            cpu_threshold: 70.0,
            scale_up_cooldown: Duration::from_secs(300),
            scale_down_cooldown: Duration::from_secs(600),
        }
    }
}

/// What one tick decided for one deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    Up,
    Down,
    Hold,
}

/// Mean CPU usage across the `active` replicas; 0 when there are none.
fn average_cpu(replicas: &[ReplicaRecord]) -> f64 {
    let active: Vec<f64> = replicas
        .iter()
        .filter(|r| r.status == ReplicaStatus::Active)
        .map(|r| r.metrics.cpu_usage)
        .collect();
    if active.is_empty() {
        return 0.0;
    }
    active.iter().sum::<f64>() / active.len() as f64
}

/// Pure decision function: no I/O, no clock reads.
pub fn evaluate(
    deployment: &DeploymentRecord,
    replicas: &[ReplicaRecord],
    now: u64,
    config: &ScalerConfig,
) -> ScaleDecision {
    let avg = average_cpu(replicas);
    let count = replicas.len() as u32;

    let up_cooldown_over = deployment
        .last_scale_up
        .is_none_or(|last| now.saturating_sub(last) > config.scale_up_cooldown.as_secs());
    if avg > config.cpu_threshold && count < deployment.max_replicas && up_cooldown_over {
        return ScaleDecision::Up;
    }

    let down_cooldown_over = deployment
        .last_scale_down
        .is_none_or(|last| now.saturating_sub(last) > config.scale_down_cooldown.as_secs());
    if avg < config.cpu_threshold / 2.0 && count > deployment.min_replicas && down_cooldown_over {
        return ScaleDecision::Down;
    }

    ScaleDecision::Hold
}

/// Periodic control loop over active deployments.
pub struct ScalingController {
    state: StateStore,
    manager: Arc<DeploymentManager>,
    clock: Arc<dyn Clock>,
    config: ScalerConfig,
}

impl ScalingController {
    pub fn new(
        state: StateStore,
        manager: Arc<DeploymentManager>,
        clock: Arc<dyn Clock>,
        config: ScalerConfig,
    ) -> Self {
        Self {
            state,
            manager,
            clock,
            config,
        }
    }

    /// Evaluate every active deployment once and apply at most one scaling
    /// action each. Failures are logged; the next tick gets another shot.
    pub async fn tick(&self) -> Vec<(u64, ScaleDecision)> {
        let deployments = match self.state.list_deployments().await {
            Ok(deployments) => deployments,
            Err(e) => {
                warn!(error = %e, "scaling tick could not list deployments");
                return Vec::new();
            }
        };

        let mut decisions = Vec::new();
        for deployment in deployments {
            if deployment.status != DeploymentState::Active {
                continue;
            }

            let replicas = match self.state.list_replicas(deployment.id).await {
                Ok(replicas) => replicas,
                Err(e) => {
                    warn!(deployment_id = deployment.id, error = %e, "replica load failed");
                    continue;
                }
            };

            let now = self.clock.epoch_secs();
            let decision = evaluate(&deployment, &replicas, now, &self.config);
            debug!(
                deployment_id = deployment.id,
                avg_cpu = average_cpu(&replicas),
                replicas = replicas.len(),
                ?decision,
                "evaluated deployment"
            );

            let outcome = match decision {
                ScaleDecision::Up => self.manager.scale_up(deployment.id).await,
                ScaleDecision::Down => self.manager.scale_down(deployment.id).await,
                ScaleDecision::Hold => Ok(false),
            };
            match outcome {
                Ok(applied) => {
                    if applied {
                        info!(deployment_id = deployment.id, ?decision, "scaling applied");
                    }
                    decisions.push((deployment.id, decision));
                }
                Err(e) => {
                    warn!(
                        deployment_id = deployment.id,
                        ?decision,
                        error = %e,
                        "scaling action failed"
                    );
                    decisions.push((deployment.id, decision));
                }
            }
        }
        decisions
    }

    /// Run the control loop until shutdown.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.check_interval.as_secs(),
            threshold = self.config.cpu_threshold,
            "scaling controller started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.check_interval) => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    info!("scaling controller shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flotilla_deploy::{DeployResult, RepoHost, RepoValidator};
    use flotilla_proto::{Message, ReplicaMetrics, WorkerState};
    use flotilla_registry::{RoutingHandle, WorkerRegistry};
    use flotilla_state::{Assignment, ManualClock};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    struct AlwaysExists;

    #[async_trait]
    impl RepoHost for AlwaysExists {
        async fn repo_exists(&self, _owner: &str, _name: &str) -> DeployResult<bool> {
            Ok(true)
        }
    }

    fn test_deployment(min: u32, max: u32) -> DeploymentRecord {
        DeploymentRecord {
            id: 1,
            repo_ref: "https://github.com/acme/app.git".to_string(),
            owner: "ops".to_string(),
            min_replicas: min,
            max_replicas: max,
            status: DeploymentState::Active,
            last_scale_up: None,
            last_scale_down: None,
            assignments: Vec::new(),
            created_at: 0,
        }
    }

    fn replica(number: u32, status: ReplicaStatus, cpu: f64) -> ReplicaRecord {
        ReplicaRecord {
            id: number as u64,
            deployment_id: 1,
            replica_number: number,
            status,
            metrics: ReplicaMetrics {
                cpu_usage: cpu,
                memory_usage: 30.0,
            },
            created_at: 0,
        }
    }

    fn config() -> ScalerConfig {
        ScalerConfig::default()
    }

    // ── evaluate() ─────────────────────────────────────────────────

    #[test]
    fn holds_inside_the_band() {
        let deployment = test_deployment(1, 4);
        let replicas = vec![replica(1, ReplicaStatus::Active, 50.0)];
        assert_eq!(
            evaluate(&deployment, &replicas, 1000, &config()),
            ScaleDecision::Hold
        );
    }

    #[test]
    fn scales_up_above_threshold() {
        let deployment = test_deployment(1, 4);
        let replicas = vec![
            replica(1, ReplicaStatus::Active, 80.0),
            replica(2, ReplicaStatus::Active, 90.0),
        ];
        assert_eq!(
            evaluate(&deployment, &replicas, 1000, &config()),
            ScaleDecision::Up
        );
    }

    #[test]
    fn scale_up_blocked_at_max_replicas() {
        let deployment = test_deployment(1, 2);
        let replicas = vec![
            replica(1, ReplicaStatus::Active, 90.0),
            replica(2, ReplicaStatus::Active, 90.0),
        ];
        assert_eq!(
            evaluate(&deployment, &replicas, 1000, &config()),
            ScaleDecision::Hold
        );
    }

    #[test]
    fn scale_up_respects_cooldown() {
        // S1: burst at T0, still hot at T0+60, allowed again after 300s.
        let mut deployment = test_deployment(1, 4);
        let replicas = vec![
            replica(1, ReplicaStatus::Active, 85.0),
            replica(2, ReplicaStatus::Active, 85.0),
        ];
        let t0 = 10_000;

        assert_eq!(
            evaluate(&deployment, &replicas, t0, &config()),
            ScaleDecision::Up
        );
        deployment.last_scale_up = Some(t0);

        assert_eq!(
            evaluate(&deployment, &replicas, t0 + 60, &config()),
            ScaleDecision::Hold
        );
        assert_eq!(
            evaluate(&deployment, &replicas, t0 + 310, &config()),
            ScaleDecision::Up
        );
    }

    #[test]
    fn dead_band_between_half_and_full_threshold() {
        // S2: 40% triggers a scale-down, 50% does not (50 >= 35).
        let deployment = test_deployment(2, 6);
        let cold = vec![
            replica(1, ReplicaStatus::Active, 40.0),
            replica(2, ReplicaStatus::Active, 40.0),
            replica(3, ReplicaStatus::Active, 40.0),
        ];
        assert_eq!(
            evaluate(&deployment, &cold, 1000, &config()),
            ScaleDecision::Down
        );

        let tepid = vec![
            replica(1, ReplicaStatus::Active, 50.0),
            replica(2, ReplicaStatus::Active, 50.0),
            replica(3, ReplicaStatus::Active, 50.0),
        ];
        assert_eq!(
            evaluate(&deployment, &tepid, 1000, &config()),
            ScaleDecision::Hold
        );
    }

    #[test]
    fn scale_down_blocked_at_min_replicas() {
        let deployment = test_deployment(2, 6);
        let replicas = vec![
            replica(1, ReplicaStatus::Active, 5.0),
            replica(2, ReplicaStatus::Active, 5.0),
        ];
        assert_eq!(
            evaluate(&deployment, &replicas, 1000, &config()),
            ScaleDecision::Hold
        );
    }

    #[test]
    fn scale_down_respects_cooldown() {
        let mut deployment = test_deployment(1, 4);
        let replicas = vec![
            replica(1, ReplicaStatus::Active, 10.0),
            replica(2, ReplicaStatus::Active, 10.0),
        ];
        deployment.last_scale_down = Some(1000);

        assert_eq!(
            evaluate(&deployment, &replicas, 1300, &config()),
            ScaleDecision::Hold
        );
        assert_eq!(
            evaluate(&deployment, &replicas, 1601, &config()),
            ScaleDecision::Down
        );
    }

    #[test]
    fn pending_and_failed_replicas_are_excluded_from_the_average() {
        let deployment = test_deployment(1, 4);
        // One hot active replica; the pending one contributes nothing.
        let replicas = vec![
            replica(1, ReplicaStatus::Active, 90.0),
            replica(2, ReplicaStatus::Pending, 0.0),
            replica(3, ReplicaStatus::Failed, 0.0),
        ];
        assert!(average_cpu(&replicas) > 89.0);
        assert_eq!(
            evaluate(&deployment, &replicas, 1000, &config()),
            ScaleDecision::Up
        );
    }

    #[test]
    fn no_active_replicas_means_average_zero() {
        let deployment = test_deployment(1, 4);
        let replicas = vec![
            replica(1, ReplicaStatus::Pending, 0.0),
            replica(2, ReplicaStatus::Pending, 0.0),
        ];
        // avg 0 < 35, and 2 > min 1: the controller drains toward min.
        assert_eq!(
            evaluate(&deployment, &replicas, 1000, &config()),
            ScaleDecision::Down
        );
    }

    // ── tick() against a live manager ──────────────────────────────

    struct Harness {
        state: StateStore,
        registry: Arc<WorkerRegistry>,
        controller: ScalingController,
        clock: Arc<ManualClock>,
    }

    fn harness() -> Harness {
        let state = StateStore::in_memory();
        let clock = Arc::new(ManualClock::new(10_000));
        let registry = Arc::new(WorkerRegistry::new(state.clone(), clock.clone()));
        let manager = Arc::new(DeploymentManager::new(
            state.clone(),
            registry.clone(),
            RepoValidator::new(Box::new(AlwaysExists)),
            clock.clone(),
        ));
        let controller = ScalingController::new(
            state.clone(),
            manager,
            clock.clone(),
            ScalerConfig::default(),
        );
        Harness {
            state,
            registry,
            controller,
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

    /// Persist an active deployment with `count` active replicas at the
    /// given CPU, assigned to `worker_id`.
    async fn seed_deployment(
        h: &Harness,
        worker_id: u64,
        min: u32,
        max: u32,
        count: u32,
        cpu: f64,
    ) -> u64 {
        let id = h.state.next_deployment_id().await.unwrap();
        let assignments = (1..=count)
            .map(|n| Assignment {
                worker_id,
                replica_number: n,
                status: ReplicaStatus::Active,
            })
            .collect();
        let deployment = DeploymentRecord {
            id,
            repo_ref: "https://github.com/acme/app.git".to_string(),
            owner: "ops".to_string(),
            min_replicas: min,
            max_replicas: max,
            status: DeploymentState::Active,
            last_scale_up: None,
            last_scale_down: None,
            assignments,
            created_at: h.clock.epoch_secs(),
        };
        h.state.put_deployment(&deployment).await.unwrap();

        for n in 1..=count {
            let replica = ReplicaRecord {
                id: h.state.next_replica_id().await.unwrap(),
                deployment_id: id,
                replica_number: n,
                status: ReplicaStatus::Active,
                metrics: ReplicaMetrics {
                    cpu_usage: cpu,
                    memory_usage: 30.0,
                },
                created_at: h.clock.epoch_secs(),
            };
            h.state.put_replica(&replica).await.unwrap();
        }
        id
    }

    #[tokio::test]
    async fn hot_deployment_gains_a_replica_once_per_cooldown() {
        let h = harness();
        let (worker, mut rx) = connect_worker(&h, 1, "host-a").await;
        let id = seed_deployment(&h, worker, 1, 4, 2, 85.0).await;

        // Tick T0: scale up to 3.
        let decisions = h.controller.tick().await;
        assert_eq!(decisions, vec![(id, ScaleDecision::Up)]);
        let stored = h.state.get_deployment(id).await.unwrap().unwrap();
        assert_eq!(stored.assignments.len(), 3);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Message::DeployRepository { replica_id: 3, .. }
        ));

        // Tick T0+60: still hot, but inside the cooldown.
        h.clock.advance(60);
        let decisions = h.controller.tick().await;
        assert_eq!(decisions, vec![(id, ScaleDecision::Hold)]);
        assert!(rx.try_recv().is_err());

        // Tick T0+310: cooldown over, scale to 4.
        h.clock.advance(250);
        let decisions = h.controller.tick().await;
        assert_eq!(decisions, vec![(id, ScaleDecision::Up)]);
        let stored = h.state.get_deployment(id).await.unwrap().unwrap();
        assert_eq!(stored.assignments.len(), 4);
    }

    #[tokio::test]
    async fn cold_deployment_sheds_its_tail_once() {
        // S6: replicas [1,2,3] at avg 10 → one round removes #3 only.
        let h = harness();
        let (worker, mut rx) = connect_worker(&h, 1, "host-a").await;
        let id = seed_deployment(&h, worker, 1, 4, 3, 10.0).await;

        let decisions = h.controller.tick().await;
        assert_eq!(decisions, vec![(id, ScaleDecision::Down)]);
        assert!(matches!(
            rx.try_recv().unwrap(),
            Message::RemoveReplica { replica_id: 3, .. }
        ));

        let stored = h.state.get_deployment(id).await.unwrap().unwrap();
        assert_eq!(stored.assignments.len(), 2);
        let numbers: Vec<u32> = h
            .state
            .list_replicas(id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.replica_number)
            .collect();
        assert_eq!(numbers, vec![1, 2]);

        // Next tick is inside the scale-down cooldown: nothing happens.
        h.clock.advance(30);
        let decisions = h.controller.tick().await;
        assert_eq!(decisions, vec![(id, ScaleDecision::Hold)]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn non_active_deployments_are_skipped() {
        let h = harness();
        let (worker, _rx) = connect_worker(&h, 1, "host-a").await;
        let id = seed_deployment(&h, worker, 1, 4, 2, 95.0).await;

        let mut deployment = h.state.get_deployment(id).await.unwrap().unwrap();
        deployment.status = DeploymentState::Failed;
        h.state.put_deployment(&deployment).await.unwrap();

        assert!(h.controller.tick().await.is_empty());
    }
}
