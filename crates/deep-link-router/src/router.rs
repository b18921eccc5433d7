//! Acting on classified deep links.

use crate::{
    DeepLinkError, DeepLinkIntent, DeepLinkResult, IntentKind, LinkClassifier, Navigator, Route,
};
use session_machine::{SessionController, SessionTokens};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Path that clears the session.
const LOGOUT_PATH: &str = "/auth/logout";

/// Routes deep links into session changes and navigation.
///
/// A link that fails to classify or to act changes nothing, except that a
/// logout whose storage clear is partial still leaves the user signed out
/// at the unauthenticated root.
pub struct DeepLinkRouter {
    classifier: LinkClassifier,
    session: Arc<SessionController>,
    navigator: Arc<dyn Navigator>,
}

impl DeepLinkRouter {
    pub fn new(
        classifier: LinkClassifier,
        session: Arc<SessionController>,
        navigator: Arc<dyn Navigator>,
    ) -> Self {
        Self {
            classifier,
            session,
            navigator,
        }
    }

    /// Handle `uri`, logging any failure. Returns the route taken.
    pub async fn open(&self, uri: &str) -> Option<Route> {
        match self.route(uri).await {
            Ok(route) => Some(route),
            Err(e) => {
                error!(error = %e, "Deep link not handled");
                None
            }
        }
    }

    /// Handle `uri` and return the route taken.
    pub async fn route(&self, uri: &str) -> DeepLinkResult<Route> {
        let intent = self.classifier.classify(uri)?;
        debug!(kind = ?intent.kind, path = %intent.path, "Deep link classified");

        match intent.kind {
            IntentKind::ProviderAuthCallback => self.install_from_callback(&intent).await,
            IntentKind::PasswordResetCallback => {
                let token = intent
                    .param("token")
                    .ok_or(DeepLinkError::MissingParameter("token"))?;
                Ok(self.push(Route::PasswordReset {
                    token: token.to_string(),
                }))
            }
            IntentKind::AuthPath if intent.path == LOGOUT_PATH => self.logout().await,
            IntentKind::AuthPath => Ok(self.push(Route::AuthScreen { path: intent.path })),
            IntentKind::ContentDetail => {
                let (resource, id) = match intent.segments().as_slice() {
                    [resource, id] => (resource.to_string(), id.to_string()),
                    _ => return Err(DeepLinkError::parse(&intent.path, "not a detail path")),
                };
                Ok(self.push(Route::ContentDetail { resource, id }))
            }
            IntentKind::Passthrough => Ok(self.push(Route::Content { path: intent.path })),
        }
    }

    async fn install_from_callback(&self, intent: &DeepLinkIntent) -> DeepLinkResult<Route> {
        let access_token = intent.param("access_token").ok_or_else(|| {
            warn!(path = %intent.path, "Auth callback without access token");
            DeepLinkError::MissingParameter("access_token")
        })?;

        let tokens = SessionTokens {
            access_token: access_token.to_string(),
            refresh_token: intent.param("refresh_token").map(str::to_string),
        };
        let session = self.session.install_session(&tokens).await?;
        info!(user_id = %session.user_id, "Session installed from deep link");

        self.navigator.reset(Route::AuthenticatedRoot);
        Ok(Route::AuthenticatedRoot)
    }

    async fn logout(&self) -> DeepLinkResult<Route> {
        let cleared = self.session.sign_out_local().await;
        self.navigator.reset(Route::UnauthenticatedRoot);
        match cleared {
            Ok(()) => {
                info!("Signed out from deep link");
                Ok(Route::UnauthenticatedRoot)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn push(&self, route: Route) -> Route {
        self.navigator.push(route.clone());
        route
    }
}
