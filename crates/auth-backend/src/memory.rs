//! In-process backend for offline runs and tests.

use crate::{
    AuthBackend, AuthEvent, AuthEventBus, AuthSubscription, BackendError, BackendResult,
    RowFilter, Session, SignUpMetadata, User, PASSWORD_PROVIDER,
};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Account {
    user_id: String,
    email: String,
    secret: String,
    provider: String,
    metadata: serde_json::Value,
}

#[derive(Default)]
struct State {
    accounts: HashMap<String, Account>,
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    current: Option<Session>,
    tables: HashMap<String, Vec<serde_json::Value>>,
}

struct Inner {
    state: Mutex<State>,
    events: AuthEventBus,
    token_ttl: Duration,
    offline: AtomicBool,
    sign_in_calls: AtomicUsize,
    sign_up_calls: AtomicUsize,
}

/// Accounts, tokens and tables held in memory.
///
/// Cloning shares state. Calls made while [`set_offline`](Self::set_offline)
/// is on fail with [`BackendError::Network`].
#[derive(Clone)]
pub struct InMemoryBackend {
    inner: Arc<Inner>,
}

impl Default for InMemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::with_token_ttl(Duration::hours(1))
    }

    pub fn with_token_ttl(token_ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                events: AuthEventBus::new(),
                token_ttl,
                offline: AtomicBool::new(false),
                sign_in_calls: AtomicUsize::new(0),
                sign_up_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// Create an account directly. Returns its user id.
    pub fn register_user(&self, email: &str, secret: &str) -> String {
        let account = Account {
            user_id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            secret: secret.to_string(),
            provider: PASSWORD_PROVIDER.to_string(),
            metadata: serde_json::Value::Object(Default::default()),
        };
        let user_id = account.user_id.clone();
        self.inner
            .state
            .lock()
            .accounts
            .insert(email.to_string(), account);
        user_id
    }

    /// Mint a session for an existing account without emitting an event,
    /// as if it were issued by another device.
    pub fn issue_session(&self, email: &str) -> BackendResult<Session> {
        let mut state = self.inner.state.lock();
        let account = state
            .accounts
            .get(email)
            .cloned()
            .ok_or_else(|| BackendError::InvalidCredentials(email.to_string()))?;
        Ok(self.mint(&mut state, &account))
    }

    /// Revoke every token of the user, as a server-side sign-out would.
    pub fn revoke_user(&self, user_id: &str) {
        let mut state = self.inner.state.lock();
        state.access_tokens.retain(|_, owner| owner != user_id);
        state.refresh_tokens.retain(|_, owner| owner != user_id);
    }

    /// Simulate losing connectivity.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Number of password sign-in attempts seen.
    pub fn sign_in_calls(&self) -> usize {
        self.inner.sign_in_calls.load(Ordering::SeqCst)
    }

    /// Number of sign-up attempts seen.
    pub fn sign_up_calls(&self) -> usize {
        self.inner.sign_up_calls.load(Ordering::SeqCst)
    }

    /// Number of accounts.
    pub fn account_count(&self) -> usize {
        self.inner.state.lock().accounts.len()
    }

    /// Metadata stored for the account with `email`.
    pub fn account_metadata(&self, email: &str) -> Option<serde_json::Value> {
        self.inner
            .state
            .lock()
            .accounts
            .get(email)
            .map(|a| a.metadata.clone())
    }

    /// Seed a table row.
    pub fn insert_row(&self, table: &str, row: serde_json::Value) {
        self.inner
            .state
            .lock()
            .tables
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Current rows of a table.
    pub fn rows(&self, table: &str) -> Vec<serde_json::Value> {
        self.inner
            .state
            .lock()
            .tables
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn check_online(&self) -> BackendResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(BackendError::Network("backend unreachable".to_string()));
        }
        Ok(())
    }

    fn mint(&self, state: &mut State, account: &Account) -> Session {
        let now = Utc::now();
        let access_token = format!("mem-access-{}", Uuid::new_v4());
        let refresh_token = format!("mem-refresh-{}", Uuid::new_v4());
        state
            .access_tokens
            .insert(access_token.clone(), account.user_id.clone());
        state
            .refresh_tokens
            .insert(refresh_token.clone(), account.user_id.clone());

        Session {
            user_id: account.user_id.clone(),
            access_token,
            refresh_token: Some(refresh_token),
            issued_at: now,
            expires_at: now + self.inner.token_ttl,
            provider: account.provider.clone(),
        }
    }

    fn establish(&self, state: &mut State, session: &Session, event: fn(Session) -> AuthEvent) {
        state.current = Some(session.clone());
        self.inner.events.emit(event(session.clone()));
    }

    fn account_by_user_id<'a>(state: &'a State, user_id: &str) -> Option<&'a Account> {
        state.accounts.values().find(|a| a.user_id == user_id)
    }
}

fn user_from_account(account: &Account) -> User {
    User {
        id: account.user_id.clone(),
        email: Some(account.email.clone()),
        app_metadata: serde_json::json!({ "provider": account.provider }),
        user_metadata: account.metadata.clone(),
    }
}

fn row_matches(row: &serde_json::Value, filter: &[RowFilter]) -> bool {
    filter.iter().all(|f| match row.get(&f.column) {
        Some(serde_json::Value::String(s)) => s == &f.value,
        Some(other) => other.to_string() == f.value,
        None => false,
    })
}

#[async_trait]
impl AuthBackend for InMemoryBackend {
    async fn sign_in_with_password(&self, email: &str, secret: &str) -> BackendResult<Session> {
        self.inner.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let mut state = self.inner.state.lock();
        let account = match state.accounts.get(email) {
            Some(account) if account.secret == secret => account.clone(),
            _ => {
                return Err(BackendError::InvalidCredentials(
                    "Invalid login credentials".to_string(),
                ))
            }
        };

        let session = self.mint(&mut state, &account);
        self.establish(&mut state, &session, AuthEvent::SignedIn);
        debug!(user_id = %session.user_id, "In-memory sign-in");
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        secret: &str,
        metadata: &SignUpMetadata,
    ) -> BackendResult<Option<Session>> {
        self.inner.sign_up_calls.fetch_add(1, Ordering::SeqCst);
        self.check_online()?;

        let mut state = self.inner.state.lock();
        if state.accounts.contains_key(email) {
            return Err(BackendError::UserAlreadyExists(
                "User already registered".to_string(),
            ));
        }

        let account = Account {
            user_id: Uuid::new_v4().to_string(),
            email: email.to_string(),
            secret: secret.to_string(),
            provider: metadata.provider.clone(),
            metadata: serde_json::to_value(metadata)?,
        };
        state.accounts.insert(email.to_string(), account.clone());

        let session = self.mint(&mut state, &account);
        self.establish(&mut state, &session, AuthEvent::SignedIn);
        info!(user_id = %session.user_id, provider = %account.provider, "In-memory sign-up");
        Ok(Some(session))
    }

    async fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> BackendResult<String> {
        let url = url::Url::parse_with_params(
            "memory://auth/authorize",
            &[("provider", provider), ("redirect_to", redirect_to)],
        )
        .map_err(|e| BackendError::InvalidRequest(e.to_string()))?;
        Ok(url.into())
    }

    async fn get_session(&self) -> BackendResult<Option<Session>> {
        Ok(self.inner.state.lock().current.clone())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        let current = self.inner.state.lock().current.clone();
        self.inner
            .events
            .subscribe(AuthEvent::InitialSession(current))
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let mut state = self.inner.state.lock();
        let current = state.current.take();
        self.inner.events.emit(AuthEvent::SignedOut);

        self.check_online()?;
        if let Some(session) = current {
            state.access_tokens.remove(&session.access_token);
            if let Some(refresh) = &session.refresh_token {
                state.refresh_tokens.remove(refresh);
            }
        }
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        filter: &[RowFilter],
        patch: &serde_json::Value,
    ) -> BackendResult<Vec<serde_json::Value>> {
        self.check_online()?;
        if filter.is_empty() {
            return Err(BackendError::InvalidRequest(format!(
                "refusing unfiltered update of {table}"
            )));
        }
        let serde_json::Value::Object(patch) = patch else {
            return Err(BackendError::InvalidRequest(
                "patch must be an object".to_string(),
            ));
        };

        let mut state = self.inner.state.lock();
        if state.current.is_none() {
            return Err(BackendError::NoSession);
        }

        let rows = state.tables.entry(table.to_string()).or_default();
        let mut updated = Vec::new();
        for row in rows.iter_mut().filter(|row| row_matches(row, filter)) {
            if let serde_json::Value::Object(fields) = row {
                for (key, value) in patch {
                    fields.insert(key.clone(), value.clone());
                }
            }
            updated.push(row.clone());
        }
        Ok(updated)
    }

    async fn get_user(&self, access_token: &str) -> BackendResult<User> {
        self.check_online()?;

        let state = self.inner.state.lock();
        let user_id = state
            .access_tokens
            .get(access_token)
            .ok_or_else(|| BackendError::Unauthorized("invalid JWT".to_string()))?;
        Self::account_by_user_id(&state, user_id)
            .map(user_from_account)
            .ok_or_else(|| BackendError::Unauthorized("user not found".to_string()))
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<Session> {
        self.check_online()?;

        let mut state = self.inner.state.lock();
        let user_id = state
            .refresh_tokens
            .remove(refresh_token)
            .ok_or_else(|| BackendError::Unauthorized("Invalid Refresh Token".to_string()))?;
        let account = Self::account_by_user_id(&state, &user_id)
            .cloned()
            .ok_or_else(|| BackendError::Unauthorized("user not found".to_string()))?;

        let session = self.mint(&mut state, &account);
        self.establish(&mut state, &session, AuthEvent::TokenRefreshed);
        Ok(session)
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> BackendResult<Session> {
        let user = self.get_user(access_token).await?;

        let now = Utc::now();
        let session = Session {
            provider: user.provider(),
            user_id: user.id,
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            issued_at: now,
            expires_at: now + self.inner.token_ttl,
        };

        let mut state = self.inner.state.lock();
        self.establish(&mut state, &session, AuthEvent::SignedIn);
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sign_in_emits_signed_in() {
        let backend = InMemoryBackend::new();
        backend.register_user("a@example.com", "pw");
        let mut sub = backend.on_auth_state_change();

        assert_eq!(sub.next().await, Some(AuthEvent::InitialSession(None)));

        let session = backend
            .sign_in_with_password("a@example.com", "pw")
            .await
            .unwrap();
        assert_eq!(sub.next().await, Some(AuthEvent::SignedIn(session.clone())));
        assert_eq!(backend.get_session().await.unwrap(), Some(session));
    }

    #[tokio::test]
    async fn test_wrong_secret_is_invalid_credentials() {
        let backend = InMemoryBackend::new();
        backend.register_user("a@example.com", "pw");

        let err = backend
            .sign_in_with_password("a@example.com", "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidCredentials(_)));
    }

    #[tokio::test]
    async fn test_duplicate_sign_up_rejected() {
        let backend = InMemoryBackend::new();
        let metadata = SignUpMetadata {
            provider: "kakao".to_string(),
            provider_id: "42".to_string(),
            ..Default::default()
        };

        backend.sign_up("k@example.com", "s", &metadata).await.unwrap();
        let err = backend
            .sign_up("k@example.com", "s", &metadata)
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::UserAlreadyExists(_)));
        assert_eq!(backend.account_count(), 1);
    }

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let backend = InMemoryBackend::new();
        backend.register_user("a@example.com", "pw");
        let first = backend
            .sign_in_with_password("a@example.com", "pw")
            .await
            .unwrap();
        let refresh = first.refresh_token.clone().unwrap();

        let second = backend.refresh_session(&refresh).await.unwrap();
        assert_ne!(first.access_token, second.access_token);

        // Refresh tokens are single use.
        assert!(backend.refresh_session(&refresh).await.is_err());
    }

    #[tokio::test]
    async fn test_sign_out_offline_still_drops_local_session() {
        let backend = InMemoryBackend::new();
        backend.register_user("a@example.com", "pw");
        backend
            .sign_in_with_password("a@example.com", "pw")
            .await
            .unwrap();

        backend.set_offline(true);
        assert!(matches!(
            backend.sign_out().await,
            Err(BackendError::Network(_))
        ));
        assert_eq!(backend.get_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_update_patches_matching_rows() {
        let backend = InMemoryBackend::new();
        backend.register_user("a@example.com", "pw");
        backend
            .sign_in_with_password("a@example.com", "pw")
            .await
            .unwrap();
        backend.insert_row("profiles", serde_json::json!({"id": "u1", "nickname": null}));
        backend.insert_row("profiles", serde_json::json!({"id": "u2", "nickname": null}));

        let updated = backend
            .update(
                "profiles",
                &[RowFilter::eq("id", "u1")],
                &serde_json::json!({"nickname": "jay"}),
            )
            .await
            .unwrap();

        assert_eq!(updated.len(), 1);
        assert_eq!(backend.rows("profiles")[0]["nickname"], "jay");
        assert!(backend.rows("profiles")[1]["nickname"].is_null());
    }

    #[tokio::test]
    async fn test_update_requires_filter() {
        let backend = InMemoryBackend::new();
        let err = backend
            .update("profiles", &[], &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InvalidRequest(_)));
    }
}
