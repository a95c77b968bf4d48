//! Worker registry and message routing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use flotilla_proto::{Message, WorkerLoad, WorkerState};
use flotilla_state::{Clock, StateError, StateStore, WorkerRecord};

/// Result type alias for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Errors that can occur in the worker registry.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("unknown worker id {0}")]
    UnknownWorker(u64),

    #[error("worker {0} unreachable: routing handle is gone")]
    Unreachable(u64),

    #[error(transparent)]
    State(#[from] StateError),
}

/// A live connection to one worker.
///
/// The sender feeds the connection's writer task, so everything routed
/// through one handle reaches the worker in the order it was produced.
#[derive(Debug, Clone)]
pub struct RoutingHandle {
    /// Transport connection id; distinguishes a stale handle from its
    /// replacement after a reconnect.
    pub conn_id: u64,
    pub tx: mpsc::UnboundedSender<Message>,
}

#[derive(Default)]
struct RouteTable {
    by_worker: HashMap<u64, RoutingHandle>,
    /// conn_id → worker_id, for disconnect handling.
    by_conn: HashMap<u64, u64>,
}

impl RouteTable {
    fn insert(&mut self, worker_id: u64, handle: RoutingHandle) {
        self.by_conn.insert(handle.conn_id, worker_id);
        self.by_worker.insert(worker_id, handle);
    }

    fn remove_worker(&mut self, worker_id: u64) {
        if let Some(handle) = self.by_worker.remove(&worker_id) {
            self.by_conn.remove(&handle.conn_id);
        }
    }
}

/// Tracks connected workers and routes orchestrator messages to them.
pub struct WorkerRegistry {
    state: StateStore,
    clock: Arc<dyn Clock>,
    inactive_timeout: Duration,
    routes: Mutex<RouteTable>,
}

impl WorkerRegistry {
    pub fn new(state: StateStore, clock: Arc<dyn Clock>) -> Self {
        Self {
            state,
            clock,
            inactive_timeout: Duration::from_secs(120),
            routes: Mutex::new(RouteTable::default()),
        }
    }

    /// Override the heartbeat expiry window.
    pub fn with_inactive_timeout(mut self, timeout: Duration) -> Self {
        self.inactive_timeout = timeout;
        self
    }

    fn routes_locked(&self) -> MutexGuard<'_, RouteTable> {
        // Route table mutations never panic, so the lock cannot poison.
        self.routes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a worker connection and return its fresh id.
    ///
    /// Any prior record under the same hostname is superseded: the old
    /// worker entity and its route are purged before the new id is
    /// allocated. Stale assignments pointing at the purged id are left for
    /// the scaling loop to correct.
    pub async fn register(&self, hostname: &str, handle: RoutingHandle) -> RegistryResult<u64> {
        for stale in self.state.list_workers().await? {
            if stale.hostname == hostname {
                self.state.delete_worker(stale.id).await?;
                self.routes_locked().remove_worker(stale.id);
                info!(
                    worker_id = stale.id,
                    %hostname,
                    "superseded prior registration for hostname"
                );
            }
        }

        let id = self.state.next_worker_id().await?;
        let record = WorkerRecord {
            id,
            hostname: hostname.to_string(),
            status: WorkerState::Active,
            last_heartbeat: self.clock.epoch_secs(),
            load: WorkerLoad::default(),
        };
        self.state.put_worker(&record).await?;
        self.routes_locked().insert(id, handle);

        info!(worker_id = id, %hostname, "worker registered");
        Ok(id)
    }

    /// Refresh a worker's status, load, and heartbeat from telemetry.
    pub async fn update_status(
        &self,
        worker_id: u64,
        status: WorkerState,
        load: WorkerLoad,
    ) -> RegistryResult<()> {
        let mut record = self
            .state
            .get_worker(worker_id)
            .await?
            .ok_or(RegistryError::UnknownWorker(worker_id))?;

        record.status = status;
        record.load = load;
        record.last_heartbeat = self.clock.epoch_secs();
        self.state.put_worker(&record).await?;
        debug!(worker_id, ?status, cpu = load.cpu_usage, "worker status updated");
        Ok(())
    }

    /// Handle a transport disconnect: remove the worker behind this
    /// connection entirely.
    ///
    /// A no-op when the connection was already superseded by a reconnect
    /// (its route entry is gone), so a late disconnect never deletes the
    /// replacement record.
    pub async fn detach(&self, conn_id: u64) -> RegistryResult<()> {
        let worker_id = {
            let mut routes = self.routes_locked();
            match routes.by_conn.remove(&conn_id) {
                Some(worker_id) => {
                    routes.by_worker.remove(&worker_id);
                    worker_id
                }
                None => return Ok(()),
            }
        };

        self.state.delete_worker(worker_id).await?;
        info!(worker_id, conn_id, "worker detached");
        Ok(())
    }

    /// Purge workers whose heartbeat is stale or who reported `inactive`.
    ///
    /// Returns the reaped worker ids.
    pub async fn sweep(&self) -> RegistryResult<Vec<u64>> {
        let now = self.clock.epoch_secs();
        let cutoff = now.saturating_sub(self.inactive_timeout.as_secs());
        let mut reaped = Vec::new();

        for worker in self.state.list_workers().await? {
            if worker.last_heartbeat < cutoff || worker.status == WorkerState::Inactive {
                self.state.delete_worker(worker.id).await?;
                self.routes_locked().remove_worker(worker.id);
                warn!(
                    worker_id = worker.id,
                    hostname = %worker.hostname,
                    last_heartbeat = worker.last_heartbeat,
                    "reaped inactive worker"
                );
                reaped.push(worker.id);
            }
        }

        Ok(reaped)
    }

    /// Deliver a message through a worker's routing handle.
    ///
    /// Fails fast when the handle is gone or its connection has closed;
    /// there is no retry at this layer.
    pub fn route_to(&self, worker_id: u64, message: Message) -> RegistryResult<()> {
        let mut routes = self.routes_locked();
        let handle = routes
            .by_worker
            .get(&worker_id)
            .ok_or(RegistryError::Unreachable(worker_id))?;

        if handle.tx.send(message).is_err() {
            // Writer task is gone; drop the dead route immediately.
            routes.remove_worker(worker_id);
            return Err(RegistryError::Unreachable(worker_id));
        }
        Ok(())
    }

    /// Run the periodic inactivity sweep until shutdown.
    pub async fn run_sweeper(
        &self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(interval_secs = interval.as_secs(), "worker sweeper started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    match self.sweep().await {
                        Ok(reaped) if !reaped.is_empty() => {
                            info!(count = reaped.len(), "sweep removed workers");
                        }
                        Ok(_) => {}
                        Err(e) => warn!(error = %e, "worker sweep failed"),
                    }
                }
                _ = shutdown.changed() => {
                    info!("worker sweeper shutting down");
                    break;
                }
            }
        }
    }
}
