//! Deployment error taxonomy.

use thiserror::Error;

use flotilla_registry::RegistryError;
use flotilla_state::StateError;

/// Result type alias for deployment operations.
pub type DeployResult<T> = Result<T, DeployError>;

/// Errors surfaced by repository validation and deployment management.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The repository does not exist or cannot be canonicalized.
    #[error("invalid repository: {0}")]
    InvalidRepository(String),

    /// Replica bounds must satisfy `1 <= min <= max`.
    #[error("invalid replica bounds: min={min}, max={max}")]
    InvalidReplicaBounds { min: u32, max: u32 },

    /// Placement returned fewer workers than `min_replicas`.
    #[error("insufficient workers: need {needed}, found {found}")]
    InsufficientWorkers { needed: u32, found: u32 },

    /// A routing handle disappeared between selection and dispatch.
    #[error("worker {0} unreachable")]
    WorkerUnreachable(u64),

    /// Retriable state store failure; the admin surface maps it to 5xx.
    #[error(transparent)]
    State(#[from] StateError),
}

impl From<RegistryError> for DeployError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::Unreachable(id) | RegistryError::UnknownWorker(id) => {
                DeployError::WorkerUnreachable(id)
            }
            RegistryError::State(e) => DeployError::State(e),
        }
    }
}
