//! The backend auth/data service contract.

use crate::{AuthSubscription, BackendResult, RowFilter, Session, SignUpMetadata, User};
use async_trait::async_trait;

/// Backend auth service consumed by the session machine and the OAuth shim.
///
/// Methods that establish or clear a session also emit the matching
/// [`AuthEvent`](crate::AuthEvent) to subscribers.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Sign in with email and password. Emits `SIGNED_IN`.
    async fn sign_in_with_password(&self, email: &str, secret: &str) -> BackendResult<Session>;

    /// Create an account. Returns a session (and emits `SIGNED_IN`) when the
    /// backend confirms the account immediately.
    async fn sign_up(
        &self,
        email: &str,
        secret: &str,
        metadata: &SignUpMetadata,
    ) -> BackendResult<Option<Session>>;

    /// Authorization URL for a backend-managed OAuth provider.
    async fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> BackendResult<String>;

    /// The session the backend currently holds.
    async fn get_session(&self) -> BackendResult<Option<Session>>;

    /// Subscribe to auth state changes. The first event is `INITIAL_SESSION`.
    fn on_auth_state_change(&self) -> AuthSubscription;

    /// Drop the current session and emit `SIGNED_OUT`.
    ///
    /// The local session is dropped even when revoking it remotely fails;
    /// the remote failure is still returned.
    async fn sign_out(&self) -> BackendResult<()>;

    /// Patch rows of `table` matching every filter. Returns the updated rows.
    async fn update(
        &self,
        table: &str,
        filter: &[RowFilter],
        patch: &serde_json::Value,
    ) -> BackendResult<Vec<serde_json::Value>>;

    /// Fetch the user behind `access_token`. Doubles as a liveness check.
    async fn get_user(&self, access_token: &str) -> BackendResult<User>;

    /// Exchange a refresh token for a new session. Emits `TOKEN_REFRESHED`.
    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<Session>;

    /// Adopt externally obtained tokens after verifying them with
    /// [`get_user`](Self::get_user). Emits `SIGNED_IN`.
    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> BackendResult<Session>;
}
