//! Authorization-code login against a third-party provider.

use crate::{
    ExchangeChain, Identity, IdentityClient, ShimAuthenticator, ShimError, ShimOutcome,
    ShimResult,
};
use shell_config_and_utils::ProviderSettings;
use std::sync::Arc;
use tracing::info;
use url::Url;

/// Result of a completed code login.
#[derive(Debug, Clone)]
pub struct CodeLogin {
    pub identity: Identity,
    pub outcome: ShimOutcome,
    /// Exchange strategy that produced the provider tokens.
    pub strategy: &'static str,
}

/// Exchange, identity lookup and shim sign-in for one provider.
pub struct ProviderFlow {
    settings: ProviderSettings,
    chain: ExchangeChain,
    identity: IdentityClient,
    authenticator: Arc<ShimAuthenticator>,
}

impl ProviderFlow {
    pub fn new(
        settings: ProviderSettings,
        chain: ExchangeChain,
        authenticator: Arc<ShimAuthenticator>,
    ) -> Self {
        let identity = IdentityClient::new(settings.name.clone(), settings.userinfo_url.clone());
        Self {
            settings,
            chain,
            identity,
            authenticator,
        }
    }

    pub fn provider(&self) -> &str {
        &self.settings.name
    }

    /// Provider authorization URL for the code flow.
    pub fn authorize_url(&self, state: &str) -> ShimResult<String> {
        let mut url = Url::parse(&self.settings.authorize_url)
            .map_err(|e| ShimError::Config(format!("invalid authorize url: {e}")))?;
        url.query_pairs_mut()
            .append_pair("response_type", "code")
            .append_pair("client_id", &self.settings.client_id)
            .append_pair("redirect_uri", &self.settings.redirect_uri)
            .append_pair("state", state);
        Ok(url.into())
    }

    /// Exchange `code`, fetch the identity and sign in through the shim.
    pub async fn sign_in_with_code(&self, code: &str) -> ShimResult<CodeLogin> {
        let (tokens, strategy) = self.chain.exchange(code).await?;
        let identity = self.identity.fetch(&tokens.access_token).await?;
        info!(
            provider = %identity.provider,
            strategy,
            "Provider identity fetched"
        );

        let outcome = self.authenticator.authenticate(&identity).await?;
        Ok(CodeLogin {
            identity,
            outcome,
            strategy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CredentialDeriver;
    use auth_backend::InMemoryBackend;

    #[test]
    fn test_authorize_url_parameters() {
        let settings = ProviderSettings {
            client_id: "client-1".to_string(),
            ..ProviderSettings::default()
        };
        let deriver =
            CredentialDeriver::new(b"0123456789abcdef0123456789abcdef", "shim.test").unwrap();
        let authenticator = Arc::new(ShimAuthenticator::new(
            Arc::new(InMemoryBackend::new()),
            deriver,
        ));
        let flow = ProviderFlow::new(
            settings.clone(),
            ExchangeChain::standard(&settings, None),
            authenticator,
        );

        let url = Url::parse(&flow.authorize_url("xyz").unwrap()).unwrap();
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
        assert_eq!(url.host_str(), Some("kauth.kakao.com"));
        assert!(pairs.contains(&("response_type".into(), "code".into())));
        assert!(pairs.contains(&("client_id".into(), "client-1".into())));
        assert!(pairs.contains(&("redirect_uri".into(), "appshell://oauth-callback".into())));
        assert!(pairs.contains(&("state".into(), "xyz".into())));
    }
}
