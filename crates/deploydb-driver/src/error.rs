//! Driver error types.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Errors that end a provisioning attempt.
#[derive(Debug, Error)]
pub enum DriverError {
    /// Unsupported mode or engine, or a config of the wrong family.
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("image pull failed for {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("container start failed: {0}")]
    ContainerStart(String),

    #[error(
        "readiness timeout: no host port mapping for {port}/tcp after {waited:?} ({attempts} attempts)"
    )]
    ReadinessTimeout {
        port: u16,
        waited: Duration,
        attempts: u32,
    },

    #[error("filesystem error at {}: {source}", path.display())]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("state store error: {0}")]
    State(#[from] deploydb_state::StateError),
}

pub type DriverResult<T> = Result<T, DriverError>;
