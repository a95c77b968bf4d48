//! redb-backed key-value backend.
//!
//! The durable variant of [`KvStore`](crate::kv::KvStore): values, counters,
//! and set members live in three redb tables. Counter increments run inside
//! a single write transaction, which makes them atomic. Set members use
//! composite string keys (`{set}|{member}`) so one prefix scan yields a
//! whole set.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use tracing::debug;

use crate::error::{StateError, StateResult};
use crate::kv::KvStore;

const KV: TableDefinition<&str, &str> = TableDefinition::new("kv");
const COUNTERS: TableDefinition<&str, u64> = TableDefinition::new("counters");
const SET_MEMBERS: TableDefinition<&str, &str> = TableDefinition::new("set_members");

/// Convert any `Display` error into a `StateError::Backend`.
macro_rules! map_err {
    () => {
        |e| StateError::Backend(e.to_string())
    };
}

/// Durable key-value backend on an embedded redb database.
#[derive(Clone)]
pub struct RedbStore {
    db: Arc<Database>,
}

impl RedbStore {
    /// Open (or create) a database file at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!())?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "redb store opened");
        Ok(store)
    }

    /// Create an ephemeral database (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!())?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Opening a table in a write transaction creates it if absent.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!())?;
        txn.open_table(KV).map_err(map_err!())?;
        txn.open_table(COUNTERS).map_err(map_err!())?;
        txn.open_table(SET_MEMBERS).map_err(map_err!())?;
        txn.commit().map_err(map_err!())?;
        Ok(())
    }

    fn member_key(set: &str, member: &str) -> String {
        format!("{set}|{member}")
    }
}

#[async_trait]
impl KvStore for RedbStore {
    async fn get(&self, key: &str) -> StateResult<Option<String>> {
        let txn = self.db.begin_read().map_err(map_err!())?;
        let table = txn.open_table(KV).map_err(map_err!())?;
        Ok(table
            .get(key)
            .map_err(map_err!())?
            .map(|guard| guard.value().to_string()))
    }

    async fn put(&self, key: &str, value: &str) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!())?;
        {
            let mut table = txn.open_table(KV).map_err(map_err!())?;
            table.insert(key, value).map_err(map_err!())?;
        }
        txn.commit().map_err(map_err!())?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> StateResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!())?;
        let existed;
        {
            let mut table = txn.open_table(KV).map_err(map_err!())?;
            existed = table.remove(key).map_err(map_err!())?.is_some();
        }
        txn.commit().map_err(map_err!())?;
        Ok(existed)
    }

    async fn incr(&self, counter: &str) -> StateResult<u64> {
        let txn = self.db.begin_write().map_err(map_err!())?;
        let fresh;
        {
            let mut table = txn.open_table(COUNTERS).map_err(map_err!())?;
            let current = table
                .get(counter)
                .map_err(map_err!())?
                .map(|guard| guard.value())
                .unwrap_or(0);
            fresh = current + 1;
            table.insert(counter, fresh).map_err(map_err!())?;
        }
        txn.commit().map_err(map_err!())?;
        Ok(fresh)
    }

    async fn sadd(&self, set: &str, member: &str) -> StateResult<bool> {
        let key = Self::member_key(set, member);
        let txn = self.db.begin_write().map_err(map_err!())?;
        let added;
        {
            let mut table = txn.open_table(SET_MEMBERS).map_err(map_err!())?;
            added = table
                .insert(key.as_str(), member)
                .map_err(map_err!())?
                .is_none();
        }
        txn.commit().map_err(map_err!())?;
        Ok(added)
    }

    async fn srem(&self, set: &str, member: &str) -> StateResult<bool> {
        let key = Self::member_key(set, member);
        let txn = self.db.begin_write().map_err(map_err!())?;
        let existed;
        {
            let mut table = txn.open_table(SET_MEMBERS).map_err(map_err!())?;
            existed = table.remove(key.as_str()).map_err(map_err!())?.is_some();
        }
        txn.commit().map_err(map_err!())?;
        Ok(existed)
    }

    async fn smembers(&self, set: &str) -> StateResult<Vec<String>> {
        let prefix = format!("{set}|");
        let txn = self.db.begin_read().map_err(map_err!())?;
        let table = txn.open_table(SET_MEMBERS).map_err(map_err!())?;
        let mut members = Vec::new();
        for entry in table.iter().map_err(map_err!())? {
            let (key, value) = entry.map_err(map_err!())?;
            if key.value().starts_with(&prefix) {
                members.push(value.value().to_string());
            }
        }
        Ok(members)
    }
}
