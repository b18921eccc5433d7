//! Session controller error types.

use auth_backend::BackendError;
use oauth_shim::ShimError;
use shell_storage::StorageError;
use thiserror::Error;

/// Session controller error type.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Backend auth service error
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// Persisted session storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// OAuth shim error
    #[error("Shim error: {0}")]
    Shim(#[from] ShimError),

    /// Invalid state transition in the session FSM
    #[error("Invalid session state transition: {0}")]
    InvalidStateTransition(String),

    /// A feature the controller was not built with
    #[error("Not configured: {0}")]
    NotConfigured(String),

    /// Operation needs a current session
    #[error("Not signed in")]
    NotSignedIn,
}

impl SessionError {
    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::Backend(e) => e.user_message().to_string(),
            SessionError::Shim(e) => e.user_message().to_string(),
            SessionError::Storage(StorageError::PartialClear { .. }) => {
                "Signed out, but some saved credentials could not be removed.".to_string()
            }
            SessionError::NotSignedIn => "You are not signed in.".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result type alias using SessionError.
pub type SessionResult<T> = Result<T, SessionError>;
