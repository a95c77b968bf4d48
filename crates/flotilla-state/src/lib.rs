//! flotilla-state — state store for the flotilla orchestrator.
//!
//! The single source of truth for workers, deployments, and replicas.
//! The storage contract is a narrow key-value interface ([`KvStore`]):
//! string keys, atomic counters, and set membership. Two backends are
//! conformant:
//!
//! - [`MemoryStore`] — a mutex-protected map, the default for a single
//!   orchestrator process and for tests
//! - [`RedbStore`] — an embedded [redb](https://docs.rs/redb) database
//!   for durable state across restarts
//!
//! A replicated key-value server is a drop-in as long as it preserves the
//! same contract. The typed [`StateStore`] sits on top and owns the key
//! schema; no other crate builds storage keys.
//!
//! Store failures are retriable: every error propagates to the caller,
//! nothing is swallowed.

pub mod clock;
pub mod error;
pub mod keys;
pub mod kv;
pub mod redb_store;
pub mod store;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{StateError, StateResult};
pub use kv::{KvStore, MemoryStore};
pub use redb_store::RedbStore;
pub use store::StateStore;
pub use types::*;
