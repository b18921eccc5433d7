//! Sign-in-or-sign-up over the password primitive.

use crate::{CredentialDeriver, Identity, ShimError, ShimResult};
use auth_backend::{AuthBackend, RowFilter, Session, SignUpMetadata};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Table enriched with provider profile fields after sign-up.
const PROFILES_TABLE: &str = "profiles";

/// How a shim sign-in completed.
#[derive(Debug, Clone, PartialEq)]
pub enum ShimOutcome {
    /// An existing backend account accepted the derived credential.
    SignedIn(Session),
    /// A new account was created. `None` when the backend withholds the
    /// session until confirmation.
    SignedUp(Option<Session>),
}

impl ShimOutcome {
    pub fn session(&self) -> Option<&Session> {
        match self {
            ShimOutcome::SignedIn(session) => Some(session),
            ShimOutcome::SignedUp(session) => session.as_ref(),
        }
    }

    pub fn is_new_account(&self) -> bool {
        matches!(self, ShimOutcome::SignedUp(_))
    }
}

/// Async mutexes keyed by identity. Entries are dropped once unused.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn handle(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn release(&self, key: &str, handle: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(handle);
        if let Some(entry) = locks.get(key) {
            if Arc::strong_count(entry) == 1 {
                locks.remove(key);
            }
        }
    }

    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}

/// Emulates federated sign-in on a password-only backend.
///
/// Calls for the same `provider:provider_id` are serialized, so concurrent
/// first logins create one account.
pub struct ShimAuthenticator {
    backend: Arc<dyn AuthBackend>,
    deriver: CredentialDeriver,
    locks: KeyedLocks,
}

impl ShimAuthenticator {
    pub fn new(backend: Arc<dyn AuthBackend>, deriver: CredentialDeriver) -> Self {
        Self {
            backend,
            deriver,
            locks: KeyedLocks::default(),
        }
    }

    /// Sign in as `identity`, creating the backend account on first use.
    pub async fn authenticate(&self, identity: &Identity) -> ShimResult<ShimOutcome> {
        if identity.email.as_deref().map_or(true, str::is_empty) {
            warn!(provider = %identity.provider, "Provider identity has no email");
            return Err(ShimError::Identity(format!(
                "{} account has no email",
                identity.provider
            )));
        }

        let key = identity.key();
        let handle = self.locks.handle(&key);
        let result = {
            let _guard = handle.lock().await;
            self.sign_in_or_sign_up(identity).await
        };
        self.locks.release(&key, handle);
        result
    }

    async fn sign_in_or_sign_up(&self, identity: &Identity) -> ShimResult<ShimOutcome> {
        let credential = self
            .deriver
            .derive(&identity.provider, &identity.provider_id)?;

        match self
            .backend
            .sign_in_with_password(&credential.derived_email, &credential.derived_secret)
            .await
        {
            Ok(session) => {
                info!(user_id = %session.user_id, provider = %identity.provider, "Shim sign-in succeeded");
                return Ok(ShimOutcome::SignedIn(session));
            }
            Err(e) if e.is_transient() => {
                warn!(error = %e, "Shim sign-in failed transiently, not signing up");
                return Err(ShimError::Backend(e));
            }
            Err(e) => {
                debug!(error = %e, "Shim sign-in rejected, trying sign-up");
            }
        }

        let metadata = SignUpMetadata {
            display_name: identity.display_name.clone(),
            avatar_url: identity.avatar_url.clone(),
            provider: identity.provider.clone(),
            provider_id: identity.provider_id.clone(),
        };

        let session = self
            .backend
            .sign_up(&credential.derived_email, &credential.derived_secret, &metadata)
            .await
            .map_err(|e| {
                warn!(error = %e, provider = %identity.provider, "Shim sign-up failed");
                ShimError::SignUp(e)
            })?;

        match &session {
            Some(session) => {
                info!(user_id = %session.user_id, provider = %identity.provider, "Shim account created");
                self.enrich_profile(session, identity).await;
            }
            None => info!(provider = %identity.provider, "Shim account created, awaiting confirmation"),
        }

        Ok(ShimOutcome::SignedUp(session))
    }

    async fn enrich_profile(&self, session: &Session, identity: &Identity) {
        let mut patch = serde_json::Map::new();
        if let Some(name) = &identity.display_name {
            patch.insert("display_name".into(), name.clone().into());
        }
        if let Some(avatar) = &identity.avatar_url {
            patch.insert("avatar_url".into(), avatar.clone().into());
        }
        if patch.is_empty() {
            return;
        }

        let filter = [RowFilter::eq("id", session.user_id.clone())];
        if let Err(e) = self
            .backend
            .update(PROFILES_TABLE, &filter, &serde_json::Value::Object(patch))
            .await
        {
            warn!(error = %e, user_id = %session.user_id, "Profile enrichment failed");
        }
    }

    /// Identities with a sign-in currently in progress.
    pub fn in_flight(&self) -> usize {
        self.locks.len()
    }
}
