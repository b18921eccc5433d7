//! Backend error types.

use thiserror::Error;

/// Errors surfaced by an [`AuthBackend`](crate::AuthBackend).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Transport failure (connect, timeout, reset).
    #[error("Network error: {0}")]
    Network(String),

    /// Wrong email or password.
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    /// The sign-in method or sign-ups are disabled on the backend.
    #[error("Provider disabled: {0}")]
    ProviderDisabled(String),

    /// Sign-up for an email that already has an account.
    #[error("User already exists: {0}")]
    UserAlreadyExists(String),

    /// The access token was rejected (expired, revoked, malformed).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Any other non-success response.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    /// The response body did not have the expected shape.
    #[error("Decode error: {0}")]
    Decode(String),

    /// An operation that needs a session was called without one.
    #[error("No active session")]
    NoSession,

    /// The request could not be built from the given arguments.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl BackendError {
    /// Returns true if the operation can be retried.
    ///
    /// Transient errors are transport failures, 5xx responses and 429.
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Network(_) => true,
            BackendError::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            BackendError::Network(_) => "Network error. Check your connection and try again.",
            BackendError::InvalidCredentials(_) => "Invalid email or password.",
            BackendError::ProviderDisabled(_) => "This sign-in method is currently disabled.",
            BackendError::UserAlreadyExists(_) => "An account with this email already exists.",
            BackendError::Unauthorized(_) | BackendError::NoSession => {
                "Your session has ended. Please sign in again."
            }
            BackendError::Http { .. }
            | BackendError::Decode(_)
            | BackendError::InvalidRequest(_) => {
                "Something went wrong. Please try again."
            }
        }
    }
}

impl From<reqwest::Error> for BackendError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            BackendError::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            BackendError::Http {
                status: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            BackendError::Network(e.to_string())
        }
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(e: serde_json::Error) -> Self {
        BackendError::Decode(e.to_string())
    }
}

/// Result type alias using BackendError.
pub type BackendResult<T> = Result<T, BackendError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_network() {
        assert!(BackendError::Network("reset".to_string()).is_transient());
    }

    #[test]
    fn test_is_transient_server_errors() {
        let err = |status| BackendError::Http {
            status,
            message: String::new(),
        };
        assert!(err(500).is_transient());
        assert!(err(503).is_transient());
        assert!(err(429).is_transient());
        assert!(!err(400).is_transient());
        assert!(!err(404).is_transient());
    }

    #[test]
    fn test_auth_errors_are_not_transient() {
        assert!(!BackendError::InvalidCredentials("bad".to_string()).is_transient());
        assert!(!BackendError::ProviderDisabled("kakao".to_string()).is_transient());
        assert!(!BackendError::UserAlreadyExists("a@b.c".to_string()).is_transient());
        assert!(!BackendError::Unauthorized("revoked".to_string()).is_transient());
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            BackendError::InvalidCredentials(String::new()).user_message(),
            "Invalid email or password."
        );
        assert_eq!(
            BackendError::UserAlreadyExists(String::new()).user_message(),
            "An account with this email already exists."
        );
    }
}
