//! The fleet-link message enum and line framing.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ReplicaMetrics, ReplicaStatus, WorkerLoad, WorkerState};

/// A malformed or oversized frame.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("frame does not decode: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("frame exceeds {limit} bytes")]
    Oversized { limit: usize },
}

/// Hard cap on a single encoded frame. A frame this large is a bug or an
/// abusive peer, not a legitimate message.
pub const MAX_FRAME_BYTES: usize = 64 * 1024;

/// One frame on the fleet link, in either direction.
///
/// `replica_id` fields carry the per-deployment replica number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Message {
    /// W→O: first frame a worker sends after connecting.
    RegisterWorker {
        hostname: String,
        start_time: u64,
        current_user: String,
    },

    /// O→W: registration acknowledgement with the assigned worker id.
    WorkerRegistered { id: u64 },

    /// W→O: periodic load telemetry.
    WorkerStatus {
        worker_id: u64,
        status: WorkerState,
        load: WorkerLoad,
        timestamp: u64,
    },

    /// O→W: fetch, build, and run one replica of a repository.
    DeployRepository {
        deployment_dir: String,
        repo_url: String,
        replica_id: u32,
        deployment_id: u64,
        deployment_time: u64,
    },

    /// W→O: outcome of a deploy task, or a later replica state change.
    DeploymentStatus {
        worker_id: u64,
        deployment_id: u64,
        replica_id: u32,
        status: ReplicaStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        port: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        metrics: Option<ReplicaMetrics>,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        timestamp: u64,
    },

    /// O→W: tear down one replica.
    RemoveReplica { deployment_id: u64, replica_id: u32 },

    /// W→O: teardown confirmation.
    ReplicaRemoved {
        worker_id: u64,
        deployment_id: u64,
        replica_id: u32,
        timestamp: u64,
    },

    /// O→W: the orchestrator rejected the previous frame.
    Error { message: String },
}

/// Encode a message as a single newline-terminated JSON line.
pub fn encode_line(msg: &Message) -> Result<String, ProtocolError> {
    let mut line = serde_json::to_string(msg)?;
    if line.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::Oversized {
            limit: MAX_FRAME_BYTES,
        });
    }
    line.push('\n');
    Ok(line)
}

/// Decode one line (trailing newline optional) into a message.
pub fn decode_line(line: &str) -> Result<Message, ProtocolError> {
    if line.len() > MAX_FRAME_BYTES {
        return Err(ProtocolError::Oversized {
            limit: MAX_FRAME_BYTES,
        });
    }
    Ok(serde_json::from_str(line.trim_end())?)
}
