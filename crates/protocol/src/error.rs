//! Protocol error types

use thiserror::Error;

/// Protocol-level errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// JSON encoding or decoding failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Command keyword is not part of the protocol
    #[error("Command {0} not supported")]
    UnknownCommand(String),

    /// HELLO arguments did not match `<version> "<user agent>"`
    #[error("Invalid HELLO command")]
    InvalidHello,

    /// I/O error while writing a message
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Type alias for protocol results
pub type Result<T> = std::result::Result<T, ProtocolError>;
