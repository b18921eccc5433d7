//! Profile enrichment for the signed-in user.

use crate::RefreshConfig;
use async_trait::async_trait;
use auth_backend::{AuthBackend, BackendError, BackendResult, Session};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Display data for the current user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub provider: String,
}

/// Where profiles come from.
#[async_trait]
pub trait ProfileSource: Send + Sync {
    async fn fetch_profile(&self, session: &Session) -> BackendResult<Profile>;
}

/// Reads the profile from the backend user record.
pub struct BackendProfileSource {
    backend: Arc<dyn AuthBackend>,
}

impl BackendProfileSource {
    pub fn new(backend: Arc<dyn AuthBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl ProfileSource for BackendProfileSource {
    async fn fetch_profile(&self, session: &Session) -> BackendResult<Profile> {
        let user = self.backend.get_user(&session.access_token).await?;
        let metadata = |key: &str| {
            user.user_metadata
                .get(key)
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };

        Ok(Profile {
            display_name: metadata("display_name").or_else(|| metadata("name")),
            avatar_url: metadata("avatar_url"),
            provider: user.provider(),
            email: user.email.clone(),
            user_id: user.id.clone(),
        })
    }
}

/// Fetch a profile, retrying transient failures with backoff.
pub(crate) async fn fetch_with_backoff(
    source: &dyn ProfileSource,
    session: &Session,
    config: &RefreshConfig,
) -> Result<Profile, BackendError> {
    let attempts = config.max_retries.max(1);
    let mut attempt = 0;
    loop {
        match source.fetch_profile(session).await {
            Ok(profile) => return Ok(profile),
            Err(e) if e.is_transient() && attempt + 1 < attempts => {
                let delay = config.delay_for_attempt(attempt);
                debug!(
                    attempt = attempt + 1,
                    max_retries = attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Profile fetch failed with transient error, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        error: BackendError,
    }

    #[async_trait]
    impl ProfileSource for Flaky {
        async fn fetch_profile(&self, session: &Session) -> BackendResult<Profile> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(self.error.clone());
            }
            Ok(Profile {
                user_id: session.user_id.clone(),
                email: None,
                display_name: Some("Jay".to_string()),
                avatar_url: None,
                provider: session.provider.clone(),
            })
        }
    }

    fn session() -> Session {
        Session {
            user_id: "user-1".to_string(),
            access_token: "a".to_string(),
            refresh_token: None,
            issued_at: Utc::now(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
            provider: "email".to_string(),
        }
    }

    fn fast() -> RefreshConfig {
        RefreshConfig {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
        }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let source = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
            error: BackendError::Network("reset".to_string()),
        };
        let profile = fetch_with_backoff(&source, &session(), &fast()).await.unwrap();
        assert_eq!(profile.display_name.as_deref(), Some("Jay"));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let source = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            error: BackendError::Network("reset".to_string()),
        };
        assert!(fetch_with_backoff(&source, &session(), &fast()).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failure_is_not_retried() {
        let source = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
            error: BackendError::Unauthorized("revoked".to_string()),
        };
        assert!(fetch_with_backoff(&source, &session(), &fast()).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
    }
}
