//! Bridge error types.

use thiserror::Error;

/// Bridge error type.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed or unroutable message
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The host answered with `success: false`
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// No response within the bounded wait
    #[error("Request {callback_id} timed out after {after_ms}ms")]
    Timeout { callback_id: String, after_ms: u128 },

    /// The transport could not take the message
    #[error("Transport error: {0}")]
    Transport(String),

    /// The client was shut down
    #[error("Channel closed")]
    ChannelClosed,
}

/// Result type alias using BridgeError.
pub type BridgeResult<T> = Result<T, BridgeError>;
