//! flotilla-fleet — the orchestrator side of the worker transport.
//!
//! Accepts persistent TCP connections from worker agents, decodes
//! line-delimited JSON frames at the edge, and dispatches them to the
//! registry and the deployment manager. Each connection owns a writer
//! task fed by an unbounded channel; that channel is the routing handle
//! the registry hands out, which is what makes per-worker delivery FIFO.
//!
//! A malformed line is logged and dropped; it never tears the connection
//! down. A closed socket detaches the worker.

pub mod server;

pub use server::FleetServer;
