//! Worker ranking.

use std::cmp::Ordering;

use tracing::debug;

use flotilla_proto::WorkerState;
use flotilla_state::WorkerRecord;

/// Workers at or above this CPU percentage are never candidates.
pub const CPU_CANDIDATE_CEILING: f64 = 80.0;

/// Select up to `n` workers for new replicas.
///
/// Candidates are `active` workers under the CPU ceiling, ranked by
/// ascending CPU usage; ties go to the worker with the earlier heartbeat.
pub fn select_workers(workers: &[WorkerRecord], n: usize) -> Vec<WorkerRecord> {
    let mut candidates: Vec<WorkerRecord> = workers
        .iter()
        .filter(|w| w.status == WorkerState::Active && w.load.cpu_usage < CPU_CANDIDATE_CEILING)
        .cloned()
        .collect();

    candidates.sort_by(|a, b| {
        a.load
            .cpu_usage
            .partial_cmp(&b.load.cpu_usage)
            .unwrap_or(Ordering::Equal)
            .then(a.last_heartbeat.cmp(&b.last_heartbeat))
    });

    candidates.truncate(n);
    debug!(
        requested = n,
        selected = candidates.len(),
        "selected placement candidates"
    );
    candidates
}

/// The single-worker variant used on scale-up.
pub fn find_one(workers: &[WorkerRecord]) -> Option<WorkerRecord> {
    select_workers(workers, 1).into_iter().next()
}
