//! Session controller: one owner for the current session.
//!
//! Backend auth events are the source of truth. Imperative calls such as
//! [`SessionController::sign_in_with_password`] only toggle `loading` and
//! `error`; the resulting session arrives as an event through the pump
//! started by [`SessionController::start`].

use crate::fsm::{RefreshConfig, SessionMachine, SessionMachineInput, SessionState};
use crate::profile::{fetch_with_backoff, Profile, ProfileSource};
use crate::{SessionError, SessionResult};
use auth_backend::{AuthBackend, AuthEvent, BackendError, Session};
use chrono::Utc;
use oauth_shim::{CodeLogin, Identity, ProviderFlow, ShimAuthenticator, ShimOutcome};
use parking_lot::Mutex;
use shell_storage::{SessionMeta, SessionVault, StoredSession};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Receives the access token whenever a new session is established.
pub trait TokenSink: Send + Sync {
    fn push_token(&self, access_token: &str);

    /// Called when the session is cleared.
    fn clear_token(&self) {}
}

/// Email and password for a direct sign-in.
#[derive(Clone)]
pub struct Credentials {
    pub email: String,
    pub secret: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            secret: secret.into(),
        }
    }
}

/// Externally obtained token material (for example from a deep link).
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("access_token", &"[REDACTED]")
            .field("has_refresh_token", &self.refresh_token.is_some())
            .finish()
    }
}

/// Everything observers need, published on every change.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub session: Option<Session>,
    pub initialized: bool,
    pub loading: bool,
    pub error: Option<String>,
    pub profile: Option<Profile>,
    pub profile_error: Option<String>,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: SessionState::Uninitialized,
            session: None,
            initialized: false,
            loading: false,
            error: None,
            profile: None,
            profile_error: None,
        }
    }
}

fn to_stored(session: &Session) -> StoredSession {
    StoredSession {
        access_token: session.access_token.clone(),
        refresh_token: session.refresh_token.clone(),
        meta: SessionMeta {
            user_id: session.user_id.clone(),
            provider: session.provider.clone(),
            issued_at: session.issued_at,
            expires_at: session.expires_at,
        },
    }
}

struct Shared {
    backend: Arc<dyn AuthBackend>,
    vault: SessionVault,
    shim: Option<Arc<ShimAuthenticator>>,
    profiles: Option<Arc<dyn ProfileSource>>,
    token_sink: Option<Arc<dyn TokenSink>>,
    refresh_config: RefreshConfig,
    fsm: Mutex<SessionMachine>,
    initialized: AtomicBool,
    /// Serializes event application so events apply in emission order.
    event_lock: tokio::sync::Mutex<()>,
    snapshot: watch::Sender<SessionSnapshot>,
    pump: Mutex<Option<JoinHandle<()>>>,
    profile_task: Mutex<Option<JoinHandle<()>>>,
}

/// Builder for [`SessionController`].
pub struct SessionControllerBuilder {
    backend: Arc<dyn AuthBackend>,
    vault: SessionVault,
    shim: Option<Arc<ShimAuthenticator>>,
    profiles: Option<Arc<dyn ProfileSource>>,
    token_sink: Option<Arc<dyn TokenSink>>,
    refresh_config: RefreshConfig,
}

impl SessionControllerBuilder {
    #[must_use]
    pub fn shim(mut self, shim: Arc<ShimAuthenticator>) -> Self {
        self.shim = Some(shim);
        self
    }

    #[must_use]
    pub fn profile_source(mut self, source: Arc<dyn ProfileSource>) -> Self {
        self.profiles = Some(source);
        self
    }

    #[must_use]
    pub fn token_sink(mut self, sink: Arc<dyn TokenSink>) -> Self {
        self.token_sink = Some(sink);
        self
    }

    #[must_use]
    pub fn refresh_config(mut self, config: RefreshConfig) -> Self {
        self.refresh_config = config;
        self
    }

    pub fn build(self) -> SessionController {
        let (snapshot, _) = watch::channel(SessionSnapshot::default());
        SessionController {
            inner: Arc::new(Shared {
                backend: self.backend,
                vault: self.vault,
                shim: self.shim,
                profiles: self.profiles,
                token_sink: self.token_sink,
                refresh_config: self.refresh_config,
                fsm: Mutex::new(SessionMachine::new()),
                initialized: AtomicBool::new(false),
                event_lock: tokio::sync::Mutex::new(()),
                snapshot,
                pump: Mutex::new(None),
                profile_task: Mutex::new(None),
            }),
        }
    }
}

/// Owns the current session and its lifecycle.
pub struct SessionController {
    inner: Arc<Shared>,
}

impl SessionController {
    pub fn builder(backend: Arc<dyn AuthBackend>, vault: SessionVault) -> SessionControllerBuilder {
        SessionControllerBuilder {
            backend,
            vault,
            shim: None,
            profiles: None,
            token_sink: None,
            refresh_config: RefreshConfig::default(),
        }
    }

    /// Restore the persisted session and settle the initial state.
    ///
    /// Sets `initialized` exactly once whatever the outcome. Does nothing if
    /// an `INITIAL_SESSION` event already settled the state.
    pub async fn initialize(&self) -> SessionResult<SessionState> {
        self.inner.initialize().await
    }

    /// Apply one backend auth event.
    pub async fn handle_provider_event(&self, event: AuthEvent) -> SessionResult<()> {
        self.inner.handle_event(event).await
    }

    /// Subscribe to backend events and spawn the pump. Idempotent.
    pub fn start(&self) {
        let mut pump = self.inner.pump.lock();
        if pump.is_some() {
            return;
        }

        let mut subscription = self.inner.backend.on_auth_state_change();
        let shared = self.inner.clone();
        *pump = Some(tokio::spawn(async move {
            while let Some(event) = subscription.next().await {
                let name = event.name();
                if let Err(e) = shared.handle_event(event).await {
                    warn!(event = name, error = %e, "Failed to apply auth event");
                    shared.set_error(Some(e.user_message()));
                }
            }
            debug!("Auth event stream ended");
        }));
        info!("Session event pump started");
    }

    /// Stop the pump and drop the backend subscription.
    pub fn shutdown(&self) {
        if let Some(pump) = self.inner.pump.lock().take() {
            pump.abort();
            info!("Session event pump stopped");
        }
        if let Some(task) = self.inner.profile_task.lock().take() {
            task.abort();
        }
    }

    pub async fn sign_in_with_password(&self, credentials: &Credentials) -> SessionResult<()> {
        let backend = self.inner.backend.clone();
        self.inner
            .run_loading(async move {
                backend
                    .sign_in_with_password(&credentials.email, &credentials.secret)
                    .await
                    .map(|_| ())
                    .map_err(SessionError::from)
            })
            .await
    }

    /// Sign in through the OAuth shim for an already fetched identity.
    pub async fn sign_in_with_shim_provider(&self, identity: &Identity) -> SessionResult<ShimOutcome> {
        let shim = self.inner.shim.clone();
        self.inner
            .run_loading(async move {
                let shim = shim.ok_or_else(|| SessionError::NotConfigured("OAuth shim".to_string()))?;
                shim.authenticate(identity).await.map_err(SessionError::from)
            })
            .await
    }

    /// Finish a provider authorization-code login through `flow`.
    ///
    /// Like the other sign-in entry points this only toggles `loading` and
    /// `error`; the state follows the backend event.
    pub async fn sign_in_with_provider_code(
        &self,
        flow: &ProviderFlow,
        code: &str,
    ) -> SessionResult<CodeLogin> {
        self.inner
            .run_loading(async move { flow.sign_in_with_code(code).await.map_err(SessionError::from) })
            .await
    }

    /// Ask the backend to sign out. The state follows the `SIGNED_OUT` event.
    pub async fn sign_out(&self) -> SessionResult<()> {
        let backend = self.inner.backend.clone();
        self.inner
            .run_loading(async move { backend.sign_out().await.map_err(SessionError::from) })
            .await
    }

    /// Adopt token material and apply the resulting `SIGNED_IN` immediately.
    pub async fn install_session(&self, tokens: &SessionTokens) -> SessionResult<Session> {
        let session = self
            .inner
            .backend
            .set_session(&tokens.access_token, tokens.refresh_token.as_deref())
            .await
            .inspect_err(|e| warn!(error = %e, "Rejected installed session tokens"))?;
        self.inner
            .handle_event(AuthEvent::SignedIn(session.clone()))
            .await?;
        Ok(session)
    }

    /// Clear the session locally even when the backend is unreachable.
    ///
    /// A partial storage clear is returned as an error after the state has
    /// moved to `Unauthenticated`.
    pub async fn sign_out_local(&self) -> SessionResult<()> {
        if let Err(e) = self.inner.backend.sign_out().await {
            warn!(error = %e, "Remote sign-out failed, clearing locally");
        }
        let _guard = self.inner.event_lock.lock().await;
        self.inner.clear_locked(true)
    }

    /// Access token of the current session, refreshed first if expired.
    pub async fn valid_access_token(&self) -> SessionResult<String> {
        let session = self.current_session().ok_or(SessionError::NotSignedIn)?;
        if !session.is_expired_at(Utc::now()) {
            return Ok(session.access_token);
        }
        let refresh_token = session.refresh_token.ok_or(SessionError::NotSignedIn)?;
        let refreshed = self.inner.refresh_with_backoff(&refresh_token).await?;
        self.inner
            .handle_event(AuthEvent::TokenRefreshed(refreshed.clone()))
            .await?;
        Ok(refreshed.access_token)
    }

    pub fn current_session(&self) -> Option<Session> {
        self.inner.snapshot.borrow().session.clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.snapshot.borrow().state.is_authenticated()
    }

    pub fn state(&self) -> SessionState {
        self.inner.state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Wait until `predicate` holds for the published snapshot.
    pub async fn wait_until(
        &self,
        predicate: impl FnMut(&SessionSnapshot) -> bool,
        timeout: Duration,
    ) -> Option<SessionSnapshot> {
        let mut rx = self.inner.snapshot.subscribe();
        let waited = tokio::time::timeout(timeout, rx.wait_for(predicate)).await;
        match waited {
            Ok(Ok(snapshot)) => Some(snapshot.clone()),
            _ => None,
        }
    }
}

impl Drop for SessionController {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn state(&self) -> SessionState {
        SessionState::from(self.fsm.lock().state())
    }

    fn transition(&self, input: &SessionMachineInput) -> SessionResult<SessionState> {
        let mut fsm = self.fsm.lock();
        let old_state = SessionState::from(fsm.state());

        fsm.consume(input).map_err(|_| {
            SessionError::InvalidStateTransition(format!(
                "Cannot apply {:?} in state {:?}",
                input,
                fsm.state()
            ))
        })?;

        let new_state = SessionState::from(fsm.state());
        drop(fsm);

        if old_state != new_state {
            debug!(
                old_state = ?old_state,
                new_state = ?new_state,
                "Session state transition"
            );
        }
        Ok(new_state)
    }

    /// Flip `initialized`. Only the first caller wins.
    fn mark_initialized(&self) -> bool {
        let won = self
            .initialized
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();
        if won {
            self.snapshot.send_modify(|s| s.initialized = true);
            info!(state = ?self.state(), "Session initialized");
        }
        won
    }

    fn set_error(&self, error: Option<String>) {
        self.snapshot.send_if_modified(|s| {
            if s.error == error {
                return false;
            }
            s.error = error;
            true
        });
    }

    async fn run_loading<T, F>(&self, op: F) -> SessionResult<T>
    where
        F: std::future::Future<Output = SessionResult<T>>,
    {
        self.snapshot.send_modify(|s| {
            s.loading = true;
            s.error = None;
        });
        let result = op.await;
        let error = result.as_ref().err().map(SessionError::user_message);
        self.snapshot.send_modify(|s| {
            s.loading = false;
            s.error = error;
        });
        result
    }

    async fn initialize(self: &Arc<Self>) -> SessionResult<SessionState> {
        let _guard = self.event_lock.lock().await;

        if self.initialized.load(Ordering::SeqCst) {
            debug!("Session already initialized");
            return Ok(self.state());
        }

        // A session installed or cleared by an event before initialize() wins.
        let current = self.state();
        if current.is_settled() {
            debug!(state = ?current, "Session settled before initialize");
            self.mark_initialized();
            return Ok(current);
        }

        let state = self.transition(&SessionMachineInput::InitStarted)?;
        self.snapshot.send_modify(|s| {
            s.state = state;
            s.loading = true;
            s.error = None;
        });

        let outcome = match self.restore().await {
            Ok(Some(session)) => self.establish_locked(session),
            Ok(None) => self.clear_locked(true),
            Err(e) => Err(e),
        };

        if let Err(e) = &outcome {
            error!(error = %e, "Session initialization failed");
            // Establish/clear may already have moved the state on.
            if self.state() == SessionState::Initializing {
                let state = self.transition(&SessionMachineInput::InitFailed)?;
                self.snapshot.send_modify(|s| s.state = state);
            }
        }

        self.snapshot.send_modify(|s| {
            s.loading = false;
            s.error = outcome.as_ref().err().map(SessionError::user_message);
        });
        self.mark_initialized();

        outcome.map(|_| self.state())
    }

    /// Load the persisted session and check it is still alive.
    async fn restore(&self) -> SessionResult<Option<Session>> {
        let Some(stored) = self.vault.load_session()? else {
            info!("No persisted session");
            return Ok(None);
        };

        let user_id = stored.meta.user_id.clone();
        let result = if stored.meta.is_expired_at(Utc::now()) {
            let Some(refresh_token) = stored.refresh_token.as_deref() else {
                info!(user_id = %user_id, "Persisted session expired without refresh token");
                return Ok(None);
            };
            info!(user_id = %user_id, "Persisted session expired, refreshing");
            self.refresh_with_backoff(refresh_token).await
        } else {
            debug!(user_id = %user_id, "Verifying persisted session with backend");
            self.backend
                .set_session(&stored.access_token, stored.refresh_token.as_deref())
                .await
        };

        match result {
            Ok(session) => {
                info!(user_id = %session.user_id, "Persisted session restored");
                Ok(Some(session))
            }
            Err(e) if e.is_transient() => Err(e.into()),
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Persisted session rejected");
                Ok(None)
            }
        }
    }

    async fn refresh_with_backoff(&self, refresh_token: &str) -> Result<Session, BackendError> {
        let attempts = self.refresh_config.max_retries.max(1);
        let mut attempt = 0;
        loop {
            match self.backend.refresh_session(refresh_token).await {
                Ok(session) => return Ok(session),
                Err(e) if e.is_transient() && attempt + 1 < attempts => {
                    let delay = self.refresh_config.delay_for_attempt(attempt);
                    debug!(
                        attempt = attempt + 1,
                        max_retries = attempts,
                        delay_ms = delay.as_millis() as u64,
                        "Refresh failed with transient error, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    warn!(error = %e, attempts = attempt + 1, "Token refresh failed");
                    return Err(e);
                }
            }
        }
    }

    async fn handle_event(self: &Arc<Self>, event: AuthEvent) -> SessionResult<()> {
        let _guard = self.event_lock.lock().await;
        debug!(event = event.name(), "Auth event");

        match event {
            AuthEvent::InitialSession(session) => {
                if self.initialized.load(Ordering::SeqCst)
                    || self.state() == SessionState::Initializing
                {
                    debug!("INITIAL_SESSION coalesced with initialize()");
                    return Ok(());
                }
                let result = match session {
                    Some(session) => self.establish_locked(session),
                    None => self.clear_locked(true),
                };
                self.mark_initialized();
                result
            }
            AuthEvent::SignedIn(session) => self.establish_locked(session),
            AuthEvent::TokenRefreshed(session) => self.establish_locked(session),
            AuthEvent::SignedOut => self.clear_locked(true),
        }
    }

    /// Make `session` current. Caller holds `event_lock`.
    fn establish_locked(self: &Arc<Self>, session: Session) -> SessionResult<()> {
        let state = self.state();
        let current = self.snapshot.borrow().session.clone();

        if state.is_authenticated() && current.as_ref() == Some(&session) {
            debug!(user_id = %session.user_id, "Session unchanged");
            return Ok(());
        }

        self.vault.store_session(&to_stored(&session))?;

        let same_user = current.as_ref().map(|c| c.user_id.as_str()) == Some(session.user_id.as_str());
        let input = if state.is_authenticated() && same_user {
            SessionMachineInput::SessionRefreshed
        } else {
            SessionMachineInput::SessionEstablished
        };
        let state = self.transition(&input)?;

        info!(user_id = %session.user_id, provider = %session.provider, "Session established");
        self.snapshot.send_modify(|s| {
            s.state = state;
            s.session = Some(session.clone());
            s.error = None;
            if !same_user {
                s.profile = None;
                s.profile_error = None;
            }
        });

        if let Some(sink) = &self.token_sink {
            sink.push_token(&session.access_token);
        }

        if !same_user {
            self.spawn_profile_fetch(session);
        }
        Ok(())
    }

    /// Drop the current session. Caller holds `event_lock`.
    fn clear_locked(&self, clear_storage: bool) -> SessionResult<()> {
        let state = self.state();
        let had_session = self.snapshot.borrow().session.is_some();

        let cleared = if clear_storage {
            self.vault.clear_session()
        } else {
            Ok(())
        };
        if let Err(e) = &cleared {
            error!(error = %e, "Failed to clear persisted session");
        }

        if state == SessionState::Unauthenticated && !had_session {
            return cleared.map_err(SessionError::from);
        }

        let state = self.transition(&SessionMachineInput::SessionCleared)?;
        if let Some(task) = self.profile_task.lock().take() {
            task.abort();
        }

        info!("Session cleared");
        self.snapshot.send_modify(|s| {
            s.state = state;
            s.session = None;
            s.profile = None;
            s.profile_error = None;
        });

        if had_session {
            if let Some(sink) = &self.token_sink {
                sink.clear_token();
            }
        }

        cleared.map_err(SessionError::from)
    }

    fn spawn_profile_fetch(self: &Arc<Self>, session: Session) {
        let Some(source) = self.profiles.clone() else {
            return;
        };

        let shared = Arc::clone(self);
        let task = tokio::spawn(async move {
            let user_id = session.user_id.clone();
            let result = fetch_with_backoff(source.as_ref(), &session, &shared.refresh_config).await;

            let still_current = shared
                .snapshot
                .borrow()
                .session
                .as_ref()
                .is_some_and(|s| s.user_id == user_id);
            if !still_current {
                debug!(user_id = %user_id, "Dropping stale profile fetch");
                return;
            }

            match result {
                Ok(profile) => {
                    debug!(user_id = %user_id, "Profile loaded");
                    shared.snapshot.send_modify(|s| {
                        s.profile = Some(profile);
                        s.profile_error = None;
                    });
                }
                Err(e) => {
                    warn!(user_id = %user_id, error = %e, "Profile fetch failed");
                    shared.snapshot.send_modify(|s| {
                        s.profile_error = Some(e.user_message().to_string());
                    });
                }
            }
        });

        if let Some(previous) = self.profile_task.lock().replace(task) {
            previous.abort();
        }
    }
}
