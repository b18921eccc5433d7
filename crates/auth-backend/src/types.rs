//! Session, user and event types shared by every backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Provider tag for plain email/password sessions.
pub const PASSWORD_PROVIDER: &str = "email";

/// An authenticated session.
///
/// At most one is current. Refresh replaces it wholesale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub user_id: String,
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// Provider tag ("email", "kakao", ...).
    pub provider: String,
}

impl Session {
    /// Whether the access token has passed its expiry at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A backend user record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub app_metadata: serde_json::Value,
    #[serde(default)]
    pub user_metadata: serde_json::Value,
}

impl User {
    /// Provider recorded by the backend, or `"email"`.
    pub fn provider(&self) -> String {
        self.app_metadata
            .get("provider")
            .and_then(|p| p.as_str())
            .unwrap_or(PASSWORD_PROVIDER)
            .to_string()
    }
}

/// Profile data attached to an account at sign-up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignUpMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    pub provider: String,
    pub provider_id: String,
}

/// Equality filter on one column, rendered as `column=eq.value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowFilter {
    pub column: String,
    pub value: String,
}

impl RowFilter {
    pub fn eq(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }
}

/// Auth state change emitted by the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    /// First event every subscriber sees: the session current at subscribe time.
    InitialSession(Option<Session>),
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
}

impl AuthEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            AuthEvent::InitialSession(_) => "INITIAL_SESSION",
            AuthEvent::SignedIn(_) => "SIGNED_IN",
            AuthEvent::SignedOut => "SIGNED_OUT",
            AuthEvent::TokenRefreshed(_) => "TOKEN_REFRESHED",
        }
    }

    /// Session carried by the event, if any.
    pub fn session(&self) -> Option<&Session> {
        match self {
            AuthEvent::InitialSession(session) => session.as_ref(),
            AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => Some(session),
            AuthEvent::SignedOut => None,
        }
    }
}
