//! Authorization-code exchange strategies.
//!
//! An [`ExchangeChain`] tries each [`TokenExchange`] in order and stops at
//! the first success. Results are never merged across strategies.

use crate::{ExchangeAttempt, ShimError, ShimResult};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use shell_config_and_utils::ProviderSettings;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Tokens issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderTokens {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<u64>,
}

/// Error body of an OAuth token endpoint.
#[derive(Debug, Deserialize)]
struct OAuthErrorBody {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// One way of turning an authorization code into provider tokens.
#[async_trait]
pub trait TokenExchange: Send + Sync {
    /// Short name used in logs and in [`ShimError::ExchangeFailed`].
    fn name(&self) -> &'static str;

    async fn exchange(&self, code: &str) -> ShimResult<ProviderTokens>;
}

/// Native provider SDK seam.
#[async_trait]
pub trait ProviderSdk: Send + Sync {
    async fn login_with_code(&self, code: &str) -> ShimResult<ProviderTokens>;
}

/// Exchange through the provider's native SDK.
pub struct SdkExchange {
    sdk: Arc<dyn ProviderSdk>,
}

impl SdkExchange {
    pub fn new(sdk: Arc<dyn ProviderSdk>) -> Self {
        Self { sdk }
    }
}

#[async_trait]
impl TokenExchange for SdkExchange {
    fn name(&self) -> &'static str {
        "sdk"
    }

    async fn exchange(&self, code: &str) -> ShimResult<ProviderTokens> {
        self.sdk.login_with_code(code).await
    }
}

/// Direct `authorization_code` grant against the provider token endpoint.
pub struct RestExchange {
    http: Client,
    client_id: String,
    redirect_uri: String,
    token_url: String,
}

impl RestExchange {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            http: Client::new(),
            client_id: settings.client_id.clone(),
            redirect_uri: settings.redirect_uri.clone(),
            token_url: settings.token_url.clone(),
        }
    }

    /// Use a custom HTTP client (connection pool reuse).
    #[must_use]
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }
}

#[async_trait]
impl TokenExchange for RestExchange {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn exchange(&self, code: &str) -> ShimResult<ProviderTokens> {
        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("code", code),
        ];

        debug!(url = %self.token_url, "Exchanging authorization code");

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        // Some providers report errors with a 200, so look at the body first.
        if let Ok(err) = serde_json::from_str::<OAuthErrorBody>(&body) {
            return Err(ShimError::Provider {
                status: Some(status.as_u16()),
                error: err.error,
                description: err.error_description,
            });
        }
        if !status.is_success() {
            return Err(ShimError::Provider {
                status: Some(status.as_u16()),
                error: "token_request_failed".to_string(),
                description: Some(body),
            });
        }

        serde_json::from_str(&body).map_err(|e| ShimError::Provider {
            status: Some(status.as_u16()),
            error: "invalid_response".to_string(),
            description: Some(e.to_string()),
        })
    }
}

/// Ordered fallback over exchange strategies.
pub struct ExchangeChain {
    strategies: Vec<Box<dyn TokenExchange>>,
}

impl ExchangeChain {
    pub fn new(strategies: Vec<Box<dyn TokenExchange>>) -> Self {
        Self { strategies }
    }

    /// SDK first when one is available, then REST.
    pub fn standard(settings: &ProviderSettings, sdk: Option<Arc<dyn ProviderSdk>>) -> Self {
        let mut strategies: Vec<Box<dyn TokenExchange>> = Vec::new();
        if let Some(sdk) = sdk {
            strategies.push(Box::new(SdkExchange::new(sdk)));
        }
        strategies.push(Box::new(RestExchange::new(settings)));
        Self::new(strategies)
    }

    /// Names of the strategies, in order.
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Run strategies in order. Returns the first success and the name of
    /// the strategy that produced it.
    pub async fn exchange(&self, code: &str) -> ShimResult<(ProviderTokens, &'static str)> {
        let mut attempts = Vec::with_capacity(self.strategies.len());

        for strategy in &self.strategies {
            match strategy.exchange(code).await {
                Ok(tokens) => {
                    info!(strategy = strategy.name(), "Authorization code exchanged");
                    return Ok((tokens, strategy.name()));
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "Exchange strategy failed");
                    attempts.push(ExchangeAttempt {
                        strategy: strategy.name(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Err(ShimError::ExchangeFailed { attempts })
    }
}
