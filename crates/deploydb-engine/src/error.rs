//! Engine error types.

use thiserror::Error;

use deploydb_state::StateError;

use crate::pool::PoolError;

/// Errors returned by the orchestrator.
///
/// Callers of the inbound API only ever see the synchronous variants
/// (`NotFound`, `Conflict`, `Validation`, `QueueFull`, `ShuttingDown`).
/// The rest occur inside background tasks and are written to the
/// deployment log.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("deployment not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    Validation(#[from] deploydb_core::TypeError),

    #[error("work queue is full; retry later")]
    QueueFull,

    #[error("orchestrator is shutting down")]
    ShuttingDown,

    #[error("{0}")]
    Driver(#[from] deploydb_driver::DriverError),

    #[error("vault error: {0}")]
    Vault(#[from] deploydb_vault::VaultError),

    #[error("state store error: {0}")]
    State(StateError),
}

impl From<StateError> for EngineError {
    fn from(e: StateError) -> Self {
        match e {
            StateError::NotFound(id) => EngineError::NotFound(id),
            other => EngineError::State(other),
        }
    }
}

impl From<PoolError> for EngineError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Full => EngineError::QueueFull,
            PoolError::Closed => EngineError::ShuttingDown,
        }
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
