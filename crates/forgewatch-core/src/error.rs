//! Error types for forgewatch-core

use thiserror::Error;

/// Core pipeline error type
#[derive(Debug, Error)]
pub enum CoreError {
    /// Bus publish/subscribe failure
    #[error("bus error: {0}")]
    Bus(#[from] forgewatch_bus::BusError),

    /// Payload could not be parsed
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, CoreError>;
