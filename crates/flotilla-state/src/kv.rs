//! The key-value storage contract and the in-memory backend.

use std::collections::{BTreeSet, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{StateError, StateResult};

/// The narrow storage interface every backend must satisfy.
///
/// `incr` must be atomic: two concurrent calls on the same counter never
/// observe the same value.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> StateResult<Option<String>>;
    async fn put(&self, key: &str, value: &str) -> StateResult<()>;
    /// Returns true if the key existed.
    async fn delete(&self, key: &str) -> StateResult<bool>;

    /// Atomically increment a counter and return the fresh value.
    /// A counter that has never been incremented starts at 0.
    async fn incr(&self, counter: &str) -> StateResult<u64>;

    /// Returns true if the member was newly added.
    async fn sadd(&self, set: &str, member: &str) -> StateResult<bool>;
    /// Returns true if the member was present.
    async fn srem(&self, set: &str, member: &str) -> StateResult<bool>;
    async fn smembers(&self, set: &str) -> StateResult<Vec<String>>;
}

#[derive(Default)]
struct MemoryInner {
    kv: HashMap<String, String>,
    counters: HashMap<String, u64>,
    sets: HashMap<String, BTreeSet<String>>,
}

/// Mutex-protected in-memory backend.
///
/// The default for a single orchestrator process; state does not survive
/// a restart.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn locked(&self) -> StateResult<std::sync::MutexGuard<'_, MemoryInner>> {
        self.inner
            .lock()
            .map_err(|e| StateError::Backend(format!("lock poisoned: {e}")))
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        Ok(self.locked()?.kv.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> StateResult<()> {
        self.locked()?.kv.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> StateResult<bool> {
        Ok(self.locked()?.kv.remove(key).is_some())
    }

    async fn incr(&self, counter: &str) -> StateResult<u64> {
        let mut inner = self.locked()?;
        let value = inner.counters.entry(counter.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    async fn sadd(&self, set: &str, member: &str) -> StateResult<bool> {
        let mut inner = self.locked()?;
        Ok(inner
            .sets
            .entry(set.to_string())
            .or_default()
            .insert(member.to_string()))
    }

    async fn srem(&self, set: &str, member: &str) -> StateResult<bool> {
        let mut inner = self.locked()?;
        Ok(inner
            .sets
            .get_mut(set)
            .is_some_and(|members| members.remove(member)))
    }

    async fn smembers(&self, set: &str) -> StateResult<Vec<String>> {
        let inner = self.locked()?;
        Ok(inner
            .sets
            .get(set)
            .map(|members| members.iter().cloned().collect())
            .unwrap_or_default())
    }
}
