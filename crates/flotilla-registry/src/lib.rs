//! flotilla-registry — the orchestrator's view of connected workers.
//!
//! Tracks the bi-map between worker ids and live routing handles, refreshes
//! per-worker status from telemetry frames, and purges workers whose
//! heartbeats stop arriving. Hostname is the stable identity: a worker
//! that reconnects under the same hostname supersedes its previous record
//! rather than minting a duplicate.
//!
//! Routing handles are owned here and never persisted; the worker records
//! themselves live in the state store.

pub mod registry;

pub use registry::{RegistryError, RegistryResult, RoutingHandle, WorkerRegistry};
