//! Error types for forgewatch-bus

use thiserror::Error;

/// Bus error type
#[derive(Debug, Error)]
pub enum BusError {
    /// Topic does not exist
    #[error("unknown topic: {0}")]
    UnknownTopic(String),

    /// Payload serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Topic provisioning failed
    #[error("provisioning error: {0}")]
    Provisioning(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, BusError>;
