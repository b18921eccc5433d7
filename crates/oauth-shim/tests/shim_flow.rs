use async_trait::async_trait;
use auth_backend::{
    AuthBackend, AuthSubscription, BackendResult, InMemoryBackend, RowFilter, Session,
    SignUpMetadata, User,
};
use oauth_shim::{
    CredentialDeriver, ExchangeChain, Identity, ProviderFlow, ProviderSdk, ProviderTokens,
    RestExchange, SdkExchange, ShimAuthenticator, ShimError, ShimOutcome, ShimResult,
};
use shell_config_and_utils::ProviderSettings;
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

fn deriver() -> CredentialDeriver {
    CredentialDeriver::new(SECRET, "shim.test").unwrap()
}

fn kakao_identity(id: &str) -> Identity {
    Identity {
        provider_id: id.to_string(),
        provider: "kakao".to_string(),
        email: Some("jay@example.com".to_string()),
        display_name: Some("Jay".to_string()),
        avatar_url: Some("https://img.example.com/jay.png".to_string()),
    }
}

#[tokio::test]
async fn test_first_login_signs_up_then_signs_in() {
    let backend = InMemoryBackend::new();
    let shim = ShimAuthenticator::new(Arc::new(backend.clone()), deriver());
    let identity = kakao_identity("42");

    let first = shim.authenticate(&identity).await.unwrap();
    assert!(matches!(first, ShimOutcome::SignedUp(Some(_))));

    let second = shim.authenticate(&identity).await.unwrap();
    assert!(matches!(second, ShimOutcome::SignedIn(_)));

    assert_eq!(backend.account_count(), 1);
    assert_eq!(
        first.session().unwrap().user_id,
        second.session().unwrap().user_id
    );
}

/// Delays sign-in so concurrent shim calls overlap.
struct SlowBackend {
    inner: InMemoryBackend,
}

#[async_trait]
impl AuthBackend for SlowBackend {
    async fn sign_in_with_password(&self, email: &str, secret: &str) -> BackendResult<Session> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inner.sign_in_with_password(email, secret).await
    }

    async fn sign_up(
        &self,
        email: &str,
        secret: &str,
        metadata: &SignUpMetadata,
    ) -> BackendResult<Option<Session>> {
        tokio::time::sleep(Duration::from_millis(20)).await;
        self.inner.sign_up(email, secret, metadata).await
    }

    async fn sign_in_with_oauth(&self, provider: &str, redirect_to: &str) -> BackendResult<String> {
        self.inner.sign_in_with_oauth(provider, redirect_to).await
    }

    async fn get_session(&self) -> BackendResult<Option<Session>> {
        self.inner.get_session().await
    }

    fn on_auth_state_change(&self) -> AuthSubscription {
        self.inner.on_auth_state_change()
    }

    async fn sign_out(&self) -> BackendResult<()> {
        self.inner.sign_out().await
    }

    async fn update(
        &self,
        table: &str,
        filter: &[RowFilter],
        patch: &serde_json::Value,
    ) -> BackendResult<Vec<serde_json::Value>> {
        self.inner.update(table, filter, patch).await
    }

    async fn get_user(&self, access_token: &str) -> BackendResult<User> {
        self.inner.get_user(access_token).await
    }

    async fn refresh_session(&self, refresh_token: &str) -> BackendResult<Session> {
        self.inner.refresh_session(refresh_token).await
    }

    async fn set_session(
        &self,
        access_token: &str,
        refresh_token: Option<&str>,
    ) -> BackendResult<Session> {
        self.inner.set_session(access_token, refresh_token).await
    }
}

#[tokio::test]
async fn test_concurrent_first_logins_create_one_account() {
    let backend = InMemoryBackend::new();
    let slow = Arc::new(SlowBackend {
        inner: backend.clone(),
    });
    let shim = Arc::new(ShimAuthenticator::new(slow, deriver()));

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let shim = shim.clone();
        tasks.push(tokio::spawn(async move {
            shim.authenticate(&kakao_identity("42")).await
        }));
    }

    let mut signed_up = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().is_new_account() {
            signed_up += 1;
        }
    }

    assert_eq!(signed_up, 1);
    assert_eq!(backend.sign_up_calls(), 1);
    assert_eq!(backend.account_count(), 1);
    assert_eq!(shim.in_flight(), 0);
}

struct BrokenSdk;

#[async_trait]
impl ProviderSdk for BrokenSdk {
    async fn login_with_code(&self, _code: &str) -> ShimResult<ProviderTokens> {
        Err(ShimError::Network("sdk unavailable".to_string()))
    }
}

fn provider_settings(server: &MockServer) -> ProviderSettings {
    ProviderSettings {
        name: "kakao".to_string(),
        client_id: "client-1".to_string(),
        redirect_uri: "appshell://oauth-callback".to_string(),
        authorize_url: format!("{}/oauth/authorize", server.uri()),
        token_url: format!("{}/oauth/token", server.uri()),
        userinfo_url: format!("{}/v2/user/me", server.uri()),
    }
}

#[tokio::test]
async fn test_code_login_falls_back_to_rest_exchange() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains("client_id=client-1"))
        .and(body_string_contains(
            "redirect_uri=appshell%3A%2F%2Foauth-callback",
        ))
        .and(body_string_contains("code=auth-code"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "provider-access",
            "token_type": "bearer",
            "refresh_token": "provider-refresh",
            "expires_in": 21599
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/user/me"))
        .and(header("Authorization", "Bearer provider-access"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": 42,
            "kakao_account": {
                "email": "jay@example.com",
                "profile": {"nickname": "Jay"}
            }
        })))
        .expect(1)
        .mount(&server)
        .await;

    let settings = provider_settings(&server);
    let backend = InMemoryBackend::new();
    let authenticator = Arc::new(ShimAuthenticator::new(Arc::new(backend.clone()), deriver()));
    let chain = ExchangeChain::new(vec![
        Box::new(SdkExchange::new(Arc::new(BrokenSdk))),
        Box::new(RestExchange::new(&settings)),
    ]);
    let flow = ProviderFlow::new(settings, chain, authenticator);

    let login = flow.sign_in_with_code("auth-code").await.unwrap();
    assert_eq!(login.strategy, "rest");
    assert_eq!(login.identity.provider_id, "42");
    assert!(login.outcome.is_new_account());
    assert_eq!(backend.account_count(), 1);
}

#[tokio::test]
async fn test_code_login_reports_every_failed_strategy() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
            "error": "invalid_grant",
            "error_description": "authorization code not found"
        })))
        .mount(&server)
        .await;

    let settings = provider_settings(&server);
    let backend = InMemoryBackend::new();
    let authenticator = Arc::new(ShimAuthenticator::new(Arc::new(backend.clone()), deriver()));
    let flow = ProviderFlow::new(
        settings.clone(),
        ExchangeChain::standard(&settings, Some(Arc::new(BrokenSdk))),
        authenticator,
    );

    match flow.sign_in_with_code("stale").await {
        Err(ShimError::ExchangeFailed { attempts }) => {
            assert_eq!(attempts.len(), 2);
            assert_eq!(attempts[0].strategy, "sdk");
            assert_eq!(attempts[1].strategy, "rest");
            assert!(attempts[1].error.contains("invalid_grant"));
        }
        other => panic!("expected ExchangeFailed, got {other:?}"),
    }
    assert_eq!(backend.account_count(), 0);
}

#[tokio::test]
async fn test_identity_without_email_is_rejected() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/oauth/token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({"access_token": "provider-access"})),
        )
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/user/me"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"id": 42})))
        .mount(&server)
        .await;

    let settings = provider_settings(&server);
    let backend = InMemoryBackend::new();
    let authenticator = Arc::new(ShimAuthenticator::new(Arc::new(backend.clone()), deriver()));
    let flow = ProviderFlow::new(
        settings.clone(),
        ExchangeChain::standard(&settings, None),
        authenticator,
    );

    let err = flow.sign_in_with_code("code").await.unwrap_err();
    assert!(matches!(err, ShimError::Identity(_)));
    assert_eq!(backend.sign_in_calls(), 0);
}
