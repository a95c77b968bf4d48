//! flotilla-placement — candidate worker selection for new replicas.
//!
//! Pure ranking over worker records: callers load the fleet from the state
//! store and pass it in. Selection is advisory — a chosen worker can drop
//! off the fleet between selection and dispatch, and consumers must treat
//! the resulting send failure as `WorkerUnreachable`, not a placement bug.

pub mod selector;

pub use selector::{find_one, select_workers, CPU_CANDIDATE_CEILING};
