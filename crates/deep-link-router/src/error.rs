//! Deep link error types.

use session_machine::SessionError;
use thiserror::Error;

/// Deep link error type.
#[derive(Error, Debug)]
pub enum DeepLinkError {
    /// The URI could not be parsed or has no usable shape
    #[error("Malformed deep link {uri:?}: {reason}")]
    Parse { uri: String, reason: String },

    /// An https link for a host the app does not serve
    #[error("Untrusted deep link host: {0}")]
    UntrustedHost(String),

    /// A callback link without the parameter it needs
    #[error("Deep link is missing {0}")]
    MissingParameter(&'static str),

    /// Installing or clearing the session failed
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl DeepLinkError {
    pub(crate) fn parse(uri: &str, reason: impl Into<String>) -> Self {
        DeepLinkError::Parse {
            uri: uri.to_string(),
            reason: reason.into(),
        }
    }
}

/// Result type alias using DeepLinkError.
pub type DeepLinkResult<T> = Result<T, DeepLinkError>;
