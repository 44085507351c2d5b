//! Errors surfaced synchronously by `UpdateConfig`.
//!
//! Everything that goes wrong after the job id has been returned is
//! recorded on the job instead.

use thiserror::Error;

use cfgrid_state::StateError;

pub type RolloutResult<T> = Result<T, RolloutError>;

#[derive(Debug, Error)]
pub enum RolloutError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("rollout already in progress for '{0}'")]
    Conflict(String),

    #[error("shared store error: {0}")]
    State(#[from] StateError),
}
