//! Provider identity lookup.

use crate::{ShimError, ShimResult};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// A user as the identity provider describes them. Immutable once fetched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub provider_id: String,
    pub provider: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
}

impl Identity {
    /// Serialization key for per-identity locking. Matches credential
    /// derivation, which ignores the provider name's case.
    pub fn key(&self) -> String {
        format!("{}:{}", self.provider.to_ascii_lowercase(), self.provider_id)
    }
}

fn as_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a user-info body.
///
/// Accepts the Kakao shape (`id`, `kakao_account.email`,
/// `kakao_account.profile.nickname`) and the OIDC shape (`sub`, `email`,
/// `name`, `picture`).
pub fn parse_user_info(provider: &str, body: &Value) -> ShimResult<Identity> {
    let provider_id = as_string(body.get("id"))
        .or_else(|| as_string(body.get("sub")))
        .ok_or_else(|| ShimError::Identity("user info has no id".to_string()))?;

    let account = body.get("kakao_account");
    let profile = account.and_then(|a| a.get("profile"));
    let properties = body.get("properties");

    let email = as_string(account.and_then(|a| a.get("email")))
        .or_else(|| as_string(body.get("email")));
    let display_name = as_string(profile.and_then(|p| p.get("nickname")))
        .or_else(|| as_string(properties.and_then(|p| p.get("nickname"))))
        .or_else(|| as_string(body.get("name")));
    let avatar_url = as_string(profile.and_then(|p| p.get("profile_image_url")))
        .or_else(|| as_string(properties.and_then(|p| p.get("profile_image"))))
        .or_else(|| as_string(body.get("picture")));

    Ok(Identity {
        provider_id,
        provider: provider.to_string(),
        email,
        display_name,
        avatar_url,
    })
}

/// Fetches identities from the provider's user-info endpoint.
pub struct IdentityClient {
    http: Client,
    provider: String,
    userinfo_url: String,
}

impl IdentityClient {
    pub fn new(provider: impl Into<String>, userinfo_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            provider: provider.into(),
            userinfo_url: userinfo_url.into(),
        }
    }

    /// Use a custom HTTP client (connection pool reuse).
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// Fetch the identity behind a provider access token.
    pub async fn fetch(&self, access_token: &str) -> ShimResult<Identity> {
        debug!(provider = %self.provider, "Fetching provider user info");

        let response = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ShimError::Provider {
                status: Some(status.as_u16()),
                error: "userinfo_failed".to_string(),
                description: Some(body),
            });
        }

        let body: Value = response.json().await?;
        parse_user_info(&self.provider, &body)
    }
}
