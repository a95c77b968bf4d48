//! flotilla-proto — wire protocol between orchestrator and worker agents.
//!
//! The fleet link is a persistent TCP connection carrying one JSON object
//! per line. Every frame is a [`Message`], a tagged enum keyed by the
//! `event` field. Protocol conformance is checked at the edge: a line that
//! does not decode into a known variant is a [`ProtocolError`] and is
//! dropped by the receiver, never forwarded.
//!
//! # Frame catalogue
//!
//! | Direction | Event | Purpose |
//! |---|---|---|
//! | W→O | `registerWorker` | first frame on every (re)connection |
//! | O→W | `workerRegistered` | assigned worker id |
//! | W→O | `workerStatus` | periodic load telemetry |
//! | O→W | `deployRepository` | fetch, build, and run one replica |
//! | W→O | `deploymentStatus` | replica became active or failed |
//! | O→W | `removeReplica` | tear down one replica |
//! | W→O | `replicaRemoved` | teardown confirmation |
//! | O→W | `error` | orchestrator-side rejection notice |
//!
//! `replicaId` on the wire is always the per-deployment replica number
//! (first replica is 1), never the globally unique replica entity id.

pub mod message;
pub mod types;

pub use message::{decode_line, encode_line, Message, ProtocolError};
pub use types::{DeploymentState, ReplicaMetrics, ReplicaStatus, WorkerLoad, WorkerState};
