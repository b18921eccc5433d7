use auth_backend::InMemoryBackend;
use deep_link_router::{
    DeepLinkError, DeepLinkRouter, LinkClassifier, Navigator, RecordingNavigator, Route,
};
use session_machine::{SessionController, SessionState, SessionTokens};
use shell_config_and_utils::Config;
use shell_storage::{MemoryStorage, SessionVault};
use std::sync::Arc;

struct Harness {
    backend: InMemoryBackend,
    session: Arc<SessionController>,
    navigator: Arc<RecordingNavigator>,
    router: DeepLinkRouter,
    vault: SessionVault,
}

async fn harness() -> Harness {
    let backend = InMemoryBackend::new();
    let vault = SessionVault::new(Arc::new(MemoryStorage::new()));
    let session = Arc::new(
        SessionController::builder(Arc::new(backend.clone()), vault.clone()).build(),
    );
    session.initialize().await.unwrap();

    let navigator = Arc::new(RecordingNavigator::new());
    navigator.push(Route::UnauthenticatedRoot);

    let router = DeepLinkRouter::new(
        LinkClassifier::from_config(&Config::default()),
        session.clone(),
        navigator.clone(),
    );
    Harness {
        backend,
        session,
        navigator,
        router,
        vault,
    }
}

#[tokio::test]
async fn test_login_callback_installs_session_and_resets_history() {
    let h = harness().await;
    h.backend.register_user("jay@example.com", "pw");
    let issued = h.backend.issue_session("jay@example.com").unwrap();
    h.navigator.push(Route::AuthScreen {
        path: "/auth/login".to_string(),
    });

    let uri = format!(
        "appshell://login-callback?access_token={}&refresh_token={}",
        issued.access_token,
        issued.refresh_token.clone().unwrap()
    );
    let route = h.router.route(&uri).await.unwrap();

    assert_eq!(route, Route::AuthenticatedRoot);
    assert_eq!(h.navigator.index(), Some(0));
    assert_eq!(h.navigator.history(), vec![Route::AuthenticatedRoot]);

    let session = h.session.current_session().unwrap();
    assert_eq!(session.access_token, issued.access_token);
    assert_eq!(h.session.state(), SessionState::Authenticated);
    assert!(h.vault.has_session().unwrap());
}

#[tokio::test]
async fn test_web_callback_accepts_fragment_tokens() {
    let h = harness().await;
    h.backend.register_user("jay@example.com", "pw");
    let issued = h.backend.issue_session("jay@example.com").unwrap();

    let uri = format!(
        "https://app.example.com/auth/callback#access_token={}",
        issued.access_token
    );
    assert_eq!(h.router.open(&uri).await, Some(Route::AuthenticatedRoot));
    assert!(h.session.is_authenticated());
}

#[tokio::test]
async fn test_malformed_link_changes_nothing() {
    let h = harness().await;
    let before = h.navigator.history();

    let err = h.router.route("appshell://???").await.unwrap_err();
    assert!(matches!(err, DeepLinkError::Parse { .. }));
    assert_eq!(h.router.open("appshell://???").await, None);

    assert_eq!(h.navigator.history(), before);
    assert_eq!(h.session.current_session(), None);
    assert_eq!(h.session.state(), SessionState::Unauthenticated);
}

#[tokio::test]
async fn test_callback_without_access_token_is_rejected() {
    let h = harness().await;
    let before = h.navigator.history();

    let err = h
        .router
        .route("appshell://login-callback?refresh_token=r")
        .await
        .unwrap_err();
    assert!(matches!(err, DeepLinkError::MissingParameter("access_token")));
    assert_eq!(h.navigator.history(), before);
    assert_eq!(h.session.current_session(), None);
}

#[tokio::test]
async fn test_callback_with_rejected_token_changes_nothing() {
    let h = harness().await;
    let before = h.navigator.history();

    let err = h
        .router
        .route("appshell://login-callback?access_token=forged")
        .await
        .unwrap_err();
    assert!(matches!(err, DeepLinkError::Session(_)));
    assert_eq!(h.navigator.history(), before);
    assert!(!h.session.is_authenticated());
}

#[tokio::test]
async fn test_logout_clears_session_and_resets_history() {
    let h = harness().await;
    h.backend.register_user("jay@example.com", "pw");
    let issued = h.backend.issue_session("jay@example.com").unwrap();
    h.session
        .install_session(&SessionTokens {
            access_token: issued.access_token,
            refresh_token: issued.refresh_token,
        })
        .await
        .unwrap();
    h.navigator.push(Route::Content {
        path: "/feed".to_string(),
    });

    let route = h
        .router
        .route("https://app.example.com/auth/logout")
        .await
        .unwrap();

    assert_eq!(route, Route::UnauthenticatedRoot);
    assert_eq!(h.navigator.history(), vec![Route::UnauthenticatedRoot]);
    assert_eq!(h.session.state(), SessionState::Unauthenticated);
    assert!(!h.vault.has_session().unwrap());
}

#[tokio::test]
async fn test_password_reset_and_auth_paths_push() {
    let h = harness().await;

    assert_eq!(
        h.router
            .route("appshell://reset-password-callback?token=t0k")
            .await
            .unwrap(),
        Route::PasswordReset {
            token: "t0k".to_string()
        }
    );
    assert_eq!(
        h.router
            .route("https://app.example.com/auth/signup")
            .await
            .unwrap(),
        Route::AuthScreen {
            path: "/auth/signup".to_string()
        }
    );
    assert_eq!(h.navigator.index(), Some(2));
}

#[tokio::test]
async fn test_content_detail_and_passthrough() {
    let h = harness().await;

    assert_eq!(
        h.router.open("https://app.example.com/posts/42").await,
        Some(Route::ContentDetail {
            resource: "posts".to_string(),
            id: "42".to_string()
        })
    );
    assert_eq!(
        h.router.open("https://app.example.com/settings/profile").await,
        Some(Route::Content {
            path: "/settings/profile".to_string()
        })
    );
    assert_eq!(h.navigator.history().len(), 3);
}
