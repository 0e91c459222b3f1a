//! Coordinator error types.

use thiserror::Error;

/// Errors surfaced by coordinator operations.
///
/// Per-host deployment failures are not errors here: they are aggregated
/// into the rollout status.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("deployment group not found: {0}")]
    DeploymentGroupNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The existing group vanished between a failed create and its re-read.
    /// Retrying the create is safe.
    #[error("deployment group {0} was removed while a concurrent create was being resolved")]
    CoordinationRace(String),

    #[error("state store error: {0}")]
    State(#[from] convoy_state::StateError),
}

pub type CoordinatorResult<T> = Result<T, CoordinatorError>;
