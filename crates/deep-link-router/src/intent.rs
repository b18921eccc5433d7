//! URI classification.

use crate::{DeepLinkError, DeepLinkResult};
use serde::Serialize;
use shell_config_and_utils::Config;
use std::collections::BTreeMap;
use url::Url;

/// App-scheme action carrying provider tokens.
pub const LOGIN_CALLBACK: &str = "login-callback";
/// App-scheme action carrying a password reset token.
pub const RESET_PASSWORD_CALLBACK: &str = "reset-password-callback";
/// Web path carrying provider tokens.
pub const WEB_AUTH_CALLBACK_PATH: &str = "/auth/callback";

/// What a deep link asks for, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    ProviderAuthCallback,
    PasswordResetCallback,
    AuthPath,
    ContentDetail,
    Passthrough,
}

/// A classified deep link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeepLinkIntent {
    pub kind: IntentKind,
    /// Normalized path. App-scheme links use their action as the first segment.
    pub path: String,
    /// Query parameters, with fragment parameters filling any gaps.
    pub params: BTreeMap<String, String>,
}

impl DeepLinkIntent {
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .get(name)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Path segments, without empty ones.
    pub fn segments(&self) -> Vec<&str> {
        self.path.split('/').filter(|s| !s.is_empty()).collect()
    }
}

/// Turns raw URIs into [`DeepLinkIntent`]s.
#[derive(Debug, Clone)]
pub struct LinkClassifier {
    app_scheme: String,
    web_hosts: Vec<String>,
    content_resources: Vec<String>,
}

impl LinkClassifier {
    pub fn new(
        app_scheme: impl Into<String>,
        web_hosts: Vec<String>,
        content_resources: Vec<String>,
    ) -> Self {
        Self {
            app_scheme: app_scheme.into().to_ascii_lowercase(),
            web_hosts: web_hosts
                .into_iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            content_resources,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.app_scheme.clone(),
            config.web_hosts.clone(),
            config.content_resources.clone(),
        )
    }

    pub fn classify(&self, uri: &str) -> DeepLinkResult<DeepLinkIntent> {
        let url = Url::parse(uri.trim()).map_err(|e| DeepLinkError::parse(uri, e.to_string()))?;
        let path = self.normalized_path(uri, &url)?;
        let params = collect_params(&url);

        let kind = self.kind_for(&url, &path);
        Ok(DeepLinkIntent { kind, path, params })
    }

    fn normalized_path(&self, uri: &str, url: &Url) -> DeepLinkResult<String> {
        let scheme = url.scheme();

        if scheme == self.app_scheme {
            // `<scheme>://<action>/<rest>`: the action sits in the host slot.
            let action = url
                .host_str()
                .filter(|h| !h.is_empty() && h.chars().all(is_action_char))
                .ok_or_else(|| DeepLinkError::parse(uri, "missing link action"))?;
            let rest = url.path().trim_end_matches('/');
            return Ok(format!("/{}{}", action.to_ascii_lowercase(), rest));
        }

        if scheme == "https" || scheme == "http" {
            let host = url
                .host_str()
                .ok_or_else(|| DeepLinkError::parse(uri, "missing host"))?
                .to_ascii_lowercase();
            if !self.web_hosts.iter().any(|h| *h == host) {
                return Err(DeepLinkError::UntrustedHost(host));
            }
            let path = url.path().trim_end_matches('/');
            return Ok(if path.is_empty() { "/".to_string() } else { path.to_string() });
        }

        Err(DeepLinkError::parse(uri, format!("unsupported scheme {scheme:?}")))
    }

    fn kind_for(&self, url: &Url, path: &str) -> IntentKind {
        let app_link = url.scheme() == self.app_scheme;
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

        if (app_link && path == format!("/{LOGIN_CALLBACK}"))
            || (!app_link && path == WEB_AUTH_CALLBACK_PATH)
        {
            return IntentKind::ProviderAuthCallback;
        }
        if app_link && path == format!("/{RESET_PASSWORD_CALLBACK}") {
            return IntentKind::PasswordResetCallback;
        }
        if segments.first() == Some(&"auth") {
            return IntentKind::AuthPath;
        }
        if let [resource, id] = segments.as_slice() {
            if self.content_resources.iter().any(|r| r == resource) && !id.is_empty() {
                return IntentKind::ContentDetail;
            }
        }
        IntentKind::Passthrough
    }
}

fn is_action_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn collect_params(url: &Url) -> BTreeMap<String, String> {
    let mut params: BTreeMap<String, String> = url.query_pairs().into_owned().collect();
    if let Some(fragment) = url.fragment() {
        for (key, value) in url::form_urlencoded::parse(fragment.as_bytes()).into_owned() {
            params.entry(key).or_insert(value);
        }
    }
    params
}
