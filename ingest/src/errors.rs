use crate::config::ValidationError;
use crate::relay::RelayError;
use thiserror::Error;

/// Result type alias for pipeline startup and shutdown
pub type Result<T, E = IngestError> = std::result::Result<T, E>;

/// Errors that stop the pipeline from starting or shutting down cleanly.
///
/// Per-submission failures never surface here; they are logged where they
/// occur.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Relay error: {0}")]
    Relay(#[from] RelayError),

    #[error("Invalid configuration: {0}")]
    Config(#[from] ValidationError),

    #[error("Store writer task failed: {0}")]
    Writer(#[from] tokio::task::JoinError),
}
