//! OAuth shim error types.

use auth_backend::BackendError;
use std::fmt;
use thiserror::Error;

/// One failed strategy of an exchange chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeAttempt {
    pub strategy: &'static str,
    pub error: String,
}

impl fmt::Display for ExchangeAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.strategy, self.error)
    }
}

fn join_attempts(attempts: &[ExchangeAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// OAuth shim error type.
#[derive(Error, Debug)]
pub enum ShimError {
    /// Missing or unusable shim configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport failure talking to the provider.
    #[error("Network error: {0}")]
    Network(String),

    /// The provider answered with an OAuth error.
    #[error("Provider error {error}: {}", .description.as_deref().unwrap_or("no description"))]
    Provider {
        status: Option<u16>,
        error: String,
        description: Option<String>,
    },

    /// Every token exchange strategy failed.
    #[error("Token exchange failed: {}", join_attempts(.attempts))]
    ExchangeFailed { attempts: Vec<ExchangeAttempt> },

    /// The provider identity is unusable (no id, no email). Not retried.
    #[error("Identity error: {0}")]
    Identity(String),

    /// Credential derivation failed.
    #[error("Derivation error: {0}")]
    Derivation(String),

    /// Sign-in failed in a way that must not fall through to sign-up.
    #[error("Backend error: {0}")]
    Backend(BackendError),

    /// Sign-up after a failed sign-in was rejected. Terminal.
    #[error("Sign-up failed: {0}")]
    SignUp(BackendError),
}

impl ShimError {
    /// Text suitable for showing to the user.
    pub fn user_message(&self) -> &'static str {
        match self {
            ShimError::Backend(e) | ShimError::SignUp(e) => e.user_message(),
            ShimError::Network(_) => "Network error. Check your connection and try again.",
            ShimError::Identity(_) => {
                "Your account is missing required information (email). Please allow email access and try again."
            }
            _ => "Sign-in failed. Please try again.",
        }
    }
}

impl From<reqwest::Error> for ShimError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ShimError::Provider {
                status: e.status().map(|s| s.as_u16()),
                error: "invalid_response".to_string(),
                description: Some(e.to_string()),
            }
        } else {
            ShimError::Network(e.to_string())
        }
    }
}

/// Result type alias using ShimError.
pub type ShimResult<T> = Result<T, ShimError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exchange_failed_lists_attempts() {
        let err = ShimError::ExchangeFailed {
            attempts: vec![
                ExchangeAttempt {
                    strategy: "sdk",
                    error: "not installed".to_string(),
                },
                ExchangeAttempt {
                    strategy: "rest",
                    error: "invalid_grant".to_string(),
                },
            ],
        };
        assert_eq!(
            err.to_string(),
            "Token exchange failed: sdk: not installed; rest: invalid_grant"
        );
    }

    #[test]
    fn test_sign_up_message_follows_backend() {
        let err = ShimError::SignUp(BackendError::ProviderDisabled("signups".to_string()));
        assert_eq!(
            err.user_message(),
            "This sign-in method is currently disabled."
        );
    }
}
