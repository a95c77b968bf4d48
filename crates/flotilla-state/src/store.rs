//! Typed entity layer over the key-value backend.
//!
//! Owns the key schema: counters mint ids, entity records are JSON values,
//! and set indices (`workers`, `deployments`, `deployment:{id}:replicas`)
//! drive the list operations.

use std::path::Path;
use std::sync::Arc;

use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::keys;
use crate::kv::{KvStore, MemoryStore};
use crate::redb_store::RedbStore;
use crate::types::{DeploymentRecord, ReplicaRecord, WorkerRecord};

/// Thread-safe typed store shared across the orchestrator.
#[derive(Clone)]
pub struct StateStore {
    kv: Arc<dyn KvStore>,
}

impl StateStore {
    /// Wrap an arbitrary conformant backend.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    /// In-memory backend (single process, tests).
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Durable redb backend at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        Ok(Self::new(Arc::new(RedbStore::open(path)?)))
    }

    fn encode<T: serde::Serialize>(value: &T) -> StateResult<String> {
        serde_json::to_string(value).map_err(|e| StateError::Serialize(e.to_string()))
    }

    fn decode<T: serde::de::DeserializeOwned>(raw: &str) -> StateResult<T> {
        serde_json::from_str(raw).map_err(|e| StateError::Deserialize(e.to_string()))
    }

    // ── Counters ───────────────────────────────────────────────────

    pub async fn next_worker_id(&self) -> StateResult<u64> {
        self.kv.incr(keys::COUNTER_WORKER).await
    }

    pub async fn next_deployment_id(&self) -> StateResult<u64> {
        self.kv.incr(keys::COUNTER_DEPLOYMENT).await
    }

    pub async fn next_replica_id(&self) -> StateResult<u64> {
        self.kv.incr(keys::COUNTER_REPLICA).await
    }

    // ── Workers ────────────────────────────────────────────────────

    pub async fn put_worker(&self, worker: &WorkerRecord) -> StateResult<()> {
        let key = keys::worker(worker.id);
        self.kv.put(&key, &Self::encode(worker)?).await?;
        self.kv.sadd(keys::WORKERS_SET, &key).await?;
        debug!(worker_id = worker.id, hostname = %worker.hostname, "worker stored");
        Ok(())
    }

    pub async fn get_worker(&self, id: u64) -> StateResult<Option<WorkerRecord>> {
        match self.kv.get(&keys::worker(id)).await? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    /// Delete a worker. Returns true if it existed.
    pub async fn delete_worker(&self, id: u64) -> StateResult<bool> {
        let key = keys::worker(id);
        self.kv.srem(keys::WORKERS_SET, &key).await?;
        self.kv.delete(&key).await
    }

    pub async fn list_workers(&self) -> StateResult<Vec<WorkerRecord>> {
        let mut workers = Vec::new();
        for key in self.kv.smembers(keys::WORKERS_SET).await? {
            // A member whose record is gone is a torn delete; skip it.
            if let Some(raw) = self.kv.get(&key).await? {
                workers.push(Self::decode(&raw)?);
            }
        }
        Ok(workers)
    }

    // ── Deployments ────────────────────────────────────────────────

    pub async fn put_deployment(&self, deployment: &DeploymentRecord) -> StateResult<()> {
        let key = keys::deployment(deployment.id);
        self.kv.put(&key, &Self::encode(deployment)?).await?;
        self.kv.sadd(keys::DEPLOYMENTS_SET, &key).await?;
        Ok(())
    }

    pub async fn get_deployment(&self, id: u64) -> StateResult<Option<DeploymentRecord>> {
        match self.kv.get(&keys::deployment(id)).await? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_deployment(&self, id: u64) -> StateResult<bool> {
        let key = keys::deployment(id);
        self.kv.srem(keys::DEPLOYMENTS_SET, &key).await?;
        self.kv.delete(&key).await
    }

    pub async fn list_deployments(&self) -> StateResult<Vec<DeploymentRecord>> {
        let mut deployments = Vec::new();
        for key in self.kv.smembers(keys::DEPLOYMENTS_SET).await? {
            if let Some(raw) = self.kv.get(&key).await? {
                deployments.push(Self::decode(&raw)?);
            }
        }
        Ok(deployments)
    }

    // ── Replicas ───────────────────────────────────────────────────

    pub async fn put_replica(&self, replica: &ReplicaRecord) -> StateResult<()> {
        let key = keys::replica(replica.id);
        self.kv.put(&key, &Self::encode(replica)?).await?;
        self.kv
            .sadd(&keys::deployment_replicas(replica.deployment_id), &key)
            .await?;
        Ok(())
    }

    pub async fn get_replica(&self, id: u64) -> StateResult<Option<ReplicaRecord>> {
        match self.kv.get(&keys::replica(id)).await? {
            Some(raw) => Ok(Some(Self::decode(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_replica(&self, deployment_id: u64, replica_id: u64) -> StateResult<bool> {
        let key = keys::replica(replica_id);
        self.kv
            .srem(&keys::deployment_replicas(deployment_id), &key)
            .await?;
        self.kv.delete(&key).await
    }

    pub async fn list_replicas(&self, deployment_id: u64) -> StateResult<Vec<ReplicaRecord>> {
        let mut replicas: Vec<ReplicaRecord> = Vec::new();
        for key in self
            .kv
            .smembers(&keys::deployment_replicas(deployment_id))
            .await?
        {
            if let Some(raw) = self.kv.get(&key).await? {
                replicas.push(Self::decode(&raw)?);
            }
        }
        replicas.sort_by_key(|r| r.replica_number);
        Ok(replicas)
    }

    /// Delete every replica of a deployment. Returns the number deleted.
    pub async fn delete_replicas_for_deployment(&self, deployment_id: u64) -> StateResult<u32> {
        let set = keys::deployment_replicas(deployment_id);
        let mut count = 0;
        for key in self.kv.smembers(&set).await? {
            self.kv.srem(&set, &key).await?;
            if self.kv.delete(&key).await? {
                count += 1;
            }
        }
        Ok(count)
    }
}
