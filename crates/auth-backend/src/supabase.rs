//! Supabase client for the auth (GoTrue) and data (PostgREST) REST APIs.

use crate::{
    AuthBackend, AuthEvent, AuthEventBus, AuthSubscription, BackendError, BackendResult,
    RowFilter, Session, SignUpMetadata, User,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::RwLock;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use url::Url;

/// Lifetime assumed when the backend does not say.
const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Token endpoint response (password, refresh and autoconfirmed sign-up).
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

/// GoTrue has used several error body shapes over time.
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
    #[serde(default)]
    error_code: Option<String>,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl ErrorBody {
    fn text(&self) -> Option<String> {
        self.error_description
            .clone()
            .or_else(|| self.msg.clone())
            .or_else(|| self.message.clone())
            .or_else(|| self.error.clone())
    }
}

/// Claims read from an access token payload. The signature is not checked;
/// the backend verifies tokens, this only reads timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct JwtClaims {
    pub sub: String,
    #[serde(default)]
    pub exp: Option<i64>,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub email: Option<String>,
}

/// Decode the payload segment of a JWT.
pub fn decode_jwt_claims(token: &str) -> BackendResult<JwtClaims> {
    let payload = token
        .split('.')
        .nth(1)
        .ok_or_else(|| BackendError::Decode("access token is not a JWT".to_string()))?;
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| BackendError::Decode(format!("JWT payload: {e}")))?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn timestamp(secs: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(secs, 0).single()
}

/// Map a non-success response to a typed error.
fn classify_error(status: u16, body: &str) -> BackendError {
    let parsed: ErrorBody = serde_json::from_str(body).unwrap_or_default();
    let message = parsed.text().unwrap_or_else(|| format!("HTTP {status}"));
    let code = parsed
        .error_code
        .as_deref()
        .or(parsed.error.as_deref())
        .unwrap_or("");
    let lower = message.to_ascii_lowercase();

    match code {
        "invalid_credentials" => BackendError::InvalidCredentials(message),
        "user_already_exists" | "email_exists" => BackendError::UserAlreadyExists(message),
        "provider_disabled" | "email_provider_disabled" | "signup_disabled" => {
            BackendError::ProviderDisabled(message)
        }
        _ if lower.contains("invalid login credentials") => {
            BackendError::InvalidCredentials(message)
        }
        _ if lower.contains("already registered") => BackendError::UserAlreadyExists(message),
        _ if lower.contains("not enabled") || lower.contains("signups not allowed") => {
            BackendError::ProviderDisabled(message)
        }
        _ if status == 401 || status == 403 => BackendError::Unauthorized(message),
        _ => BackendError::Http { status, message },
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> BackendResult<T> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let err = classify_error(status.as_u16(), &body);
        warn!(status = %status, error = %err, "Backend request failed");
        return Err(err);
    }
    Ok(response.json().await?)
}

fn session_from_token(data: TokenResponse) -> Session {
    let now = Utc::now();
    let expires_at = data
        .expires_at
        .and_then(timestamp)
        .or_else(|| data.expires_in.map(|secs| now + Duration::seconds(secs)))
        .unwrap_or_else(|| now + Duration::seconds(DEFAULT_EXPIRES_IN_SECS));

    Session {
        provider: data.user.provider(),
        user_id: data.user.id,
        access_token: data.access_token,
        refresh_token: data.refresh_token,
        issued_at: now,
        expires_at,
    }
}

struct ClientInner {
    http: Client,
    base_url: String,
    api_key: String,
    session: RwLock<Option<Session>>,
    events: AuthEventBus,
}

/// REST client for a Supabase project.
///
/// Holds the current session in memory and broadcasts auth changes. Cloning
/// shares the session and the subscriber list.
#[derive(Clone)]
pub struct SupabaseAuthClient {
    inner: Arc<ClientInner>,
}

impl SupabaseAuthClient {
    /// Create a client for `base_url` (e.g. `https://xyz.supabase.co`).
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            inner: Arc::new(ClientInner {
                http: Client::new(),
                base_url: base_url.trim_end_matches('/').to_string(),
                api_key: api_key.into(),
                session: RwLock::new(None),
                events: AuthEventBus::new(),
            }),
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1{}", self.inner.base_url, path)
    }

    fn store_session(&self, session: &Session, event: fn(Session) -> AuthEvent) {
        *self.inner.session.write() = Some(session.clone());
        self.inner.events.emit(event(session.clone()));
    }

    async fn post_token(&self, grant_type: &str, body: serde_json::Value) -> BackendResult<Session> {
        let url = self.auth_url(&format!("/token?grant_type={grant_type}"));
        debug!(url = %url, "Requesting token");

        let response = self
            .inner
            .http
            .post(&url)
            .header("apikey", &self.inner.api_key)
            .json(&body)
            .send()
            .await?;

        let data: TokenResponse = read_json(response).await?;
        Ok(session_from_token(data))
    }
}

#[async_trait]
impl AuthBackend for SupabaseAuthClient {
    async fn sign_in_with_password(&self, email: &str, secret: &str) -> BackendResult<Session> {
        let session = self
            .post_token(
                "password",
                serde_json::json!({ "email": email, "password": secret }),
            )
            .await?;

        info!(user_id = %session.user_id, "Password sign-in succeeded");
        self.store_session(&session, AuthEvent::SignedIn);
        Ok(session)
    }

    async fn sign_up(
        &self,
        email: &str,
        secret: &str,
        metadata: &SignUpMetadata,
    ) -> BackendResult<Option<Session>> {
        let url = self.auth_url("/signup");
        debug!(url = %url, provider = %metadata.provider, "Signing up");

        let response = self
            .inner
            .http
            .post(&url)
            .header("apikey", &self.inner.api_key)
            .json(&serde_json::json!({
                "email": email,
                "password": secret,
                "data": metadata,
            }))
            .send()
            .await?;

        let body: serde_json::Value = read_json(response).await?;
        if body.get("access_token").is_none() {
            info!("Sign-up accepted, confirmation pending");
            return Ok(None);
        }

        let session = session_from_token(serde_json::from_value(body)?);
        info!(user_id = %session.user_id, "Sign-up succeeded");
        self.store_session(&session, AuthEvent::SignedIn);
        Ok(Some(session))
    }

    async fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> BackendResult<String> {
        let url = Url::parse_with_params(
            &self.auth_url("/authorize"),
            &[("provider", provider), ("redirect_to", redirect_to)],
        )
        .map_err(|e| BackendError::InvalidRequest(e.to_string()))?;
        Ok(url.into())
    }

    async fn get_session(&self) -> BackendResult<Option<Session>> {
        Ok(self.inner.session.read().clone())
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        let current = self.inner.session.read().clone();
        self.inner
            .events
            .subscribe(AuthEvent::InitialSession(current))
    }

    async fn sign_out(&self) -> BackendResult<()> {
        let session = self.inner.session.write().take();
        self.inner.events.emit(AuthEvent::SignedOut);

        let Some(session) = session else {
            return Ok(());
        };

        let url = self.auth_url("/logout");
        let response = self
            .inner
            .http
            .post(&url)
            .header("apikey", &self.inner.api_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;

        let status = response.status();
        // Already revoked or unknown: nothing left to do remotely.
        if status.is_success() || status.as_u16() == 401 || status.as_u16() == 404 {
            info!(user_id = %session.user_id, "Signed out");
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(classify_error(status.as_u16(), &body))
    }

    async fn update(
        &self,
        table: &str,
        filter: &[RowFilter],
        patch: &serde_json::Value,
    ) -> BackendResult<Vec<serde_json::Value>> {
        if filter.is_empty() {
            return Err(BackendError::InvalidRequest(format!(
                "refusing unfiltered update of {table}"
            )));
        }

        let access_token = self
            .inner
            .session
            .read()
            .as_ref()
            .map(|s| s.access_token.clone())
            .ok_or(BackendError::NoSession)?;

        let mut url = Url::parse(&format!("{}/rest/v1/{}", self.inner.base_url, table))
            .map_err(|e| BackendError::InvalidRequest(e.to_string()))?;
        {
            let mut query = url.query_pairs_mut();
            for f in filter {
                query.append_pair(&f.column, &format!("eq.{}", f.value));
            }
        }

        debug!(table = %table, filters = filter.len(), "Updating rows");

        let response = self
            .inner
            .http
            .patch(url)
            .header("apikey", &self.inner.api_key)
            .header("Prefer", "return=representation")
            .bearer_auth(access_token)
            .json(patch)
            .send()
            .await?;

        read_json(response).await
    }

    async fn get_user(&self, access_token: &str) -> BackendResult<User> {
        let url = self.auth_url("/user");
        debug!(url = %url, "Verifying access token");

        let response = self
            .inner
            .http
            .get(&url)
            .header("apikey", &self.inner.api_key)
            .bearer_auth(access_token)
            .send()
            .await?;

        read_json(response).await
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<Session> {
        let session = self
            .post_token(
                "refresh_token",
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;

        info!(user_id = %session.user_id, "Token refreshed");
        self.store_session(&session, AuthEvent::TokenRefreshed);
        Ok(session)
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> BackendResult<Session> {
        let user = self.get_user(access_token).await?;

        let now = Utc::now();
        let claims = decode_jwt_claims(access_token).ok();
        let issued_at = claims
            .as_ref()
            .and_then(|c| c.iat)
            .and_then(timestamp)
            .unwrap_or(now);
        let expires_at = claims
            .as_ref()
            .and_then(|c| c.exp)
            .and_then(timestamp)
            .unwrap_or_else(|| now + Duration::seconds(DEFAULT_EXPIRES_IN_SECS));

        let session = Session {
            provider: user.provider(),
            user_id: user.id,
            access_token: access_token.to_string(),
            refresh_token: refresh_token.map(str::to_string),
            issued_at,
            expires_at,
        };

        info!(user_id = %session.user_id, "Session adopted");
        self.store_session(&session, AuthEvent::SignedIn);
        Ok(session)
    }
}
