//! Error types for forgewatch-client

use thiserror::Error;

/// Synchronizer error type
#[derive(Debug, Error)]
pub enum ClientError {
    /// The gateway URL could not be parsed
    #[error("invalid gateway url: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// WebSocket transport failure
    #[error("websocket error: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),

    /// Every reconnect attempt was exhausted
    #[error("gave up after {attempts} connection attempts")]
    RetriesExhausted {
        /// Attempts made before giving up
        attempts: u32,
    },
}

/// Result type alias
pub type Result<T> = std::result::Result<T, ClientError>;
