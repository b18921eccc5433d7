//! Configuration management for the app shell host.

use crate::{CoreError, CoreResult, Paths};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default backend URL (can be overridden at compile time via APP_SHELL_BACKEND_URL env var).
pub const DEFAULT_BACKEND_URL: &str = match option_env!("APP_SHELL_BACKEND_URL") {
    Some(url) => url,
    None => "https://random.supabase.co",
};

/// Default backend publishable key (can be overridden at compile time via APP_SHELL_BACKEND_KEY env var).
pub const DEFAULT_BACKEND_PUBLISHABLE_KEY: &str = match option_env!("APP_SHELL_BACKEND_KEY") {
    Some(key) => key,
    None => "random-key",
};

/// Default log level.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default custom URI scheme for app callbacks.
pub const DEFAULT_APP_SCHEME: &str = "appshell";

/// Default bounded wait for a bridge round-trip.
pub const DEFAULT_BRIDGE_TIMEOUT_MS: u64 = 30_000;

/// Default domain for shim-derived account emails.
pub const DEFAULT_SHIM_EMAIL_DOMAIN: &str = "shim.app-shell.local";

/// Minimum accepted length, in bytes, of the shim key material.
pub const MIN_SHIM_SECRET_LEN: usize = 32;

const ENV_LOG_LEVEL: &str = "APP_SHELL_LOG_LEVEL";
const ENV_BACKEND_URL: &str = "APP_SHELL_BACKEND_URL";
const ENV_BACKEND_KEY: &str = "APP_SHELL_BACKEND_KEY";
const ENV_SHIM_SECRET: &str = "APP_SHELL_SHIM_SECRET";

/// Third-party identity provider endpoints and client registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Provider tag stored on sessions and shim accounts (e.g. "kakao").
    pub name: String,
    /// OAuth client id registered with the provider.
    pub client_id: String,
    /// Redirect URI registered with the provider.
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub userinfo_url: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: "kakao".to_string(),
            client_id: String::new(),
            redirect_uri: format!("{DEFAULT_APP_SCHEME}://oauth-callback"),
            authorize_url: "https://kauth.kakao.com/oauth/authorize".to_string(),
            token_url: "https://kauth.kakao.com/oauth/token".to_string(),
            userinfo_url: "https://kapi.kakao.com/v2/user/me".to_string(),
        }
    }
}

/// Main host configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Backend auth service URL.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,
    /// Backend publishable API key (public, safe to expose).
    #[serde(default = "default_backend_publishable_key")]
    pub backend_publishable_key: String,
    /// Custom scheme used by app callbacks (`<scheme>://login-callback`).
    #[serde(default = "default_app_scheme")]
    pub app_scheme: String,
    /// Hosts whose https links are routed in-app.
    #[serde(default = "default_web_hosts")]
    pub web_hosts: Vec<String>,
    /// First path segments that identify a content detail link (`/<resource>/<id>`).
    #[serde(default = "default_content_resources")]
    pub content_resources: Vec<String>,
    /// Identity provider used by the shim.
    #[serde(default)]
    pub provider: ProviderSettings,
    /// Bridge round-trip bound in milliseconds. `null` waits forever.
    #[serde(default = "default_bridge_timeout_ms")]
    pub bridge_timeout_ms: Option<u64>,
    /// Domain of shim-derived account emails.
    #[serde(default = "default_shim_email_domain")]
    pub shim_email_domain: String,
    /// Deployment key material for shim credentials. Environment only.
    #[serde(skip)]
    shim_secret: Option<String>,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_backend_url() -> String {
    DEFAULT_BACKEND_URL.to_string()
}

fn default_backend_publishable_key() -> String {
    DEFAULT_BACKEND_PUBLISHABLE_KEY.to_string()
}

fn default_app_scheme() -> String {
    DEFAULT_APP_SCHEME.to_string()
}

fn default_web_hosts() -> Vec<String> {
    vec!["app.example.com".to_string()]
}

fn default_content_resources() -> Vec<String> {
    vec!["posts".to_string(), "items".to_string()]
}

fn default_bridge_timeout_ms() -> Option<u64> {
    Some(DEFAULT_BRIDGE_TIMEOUT_MS)
}

fn default_shim_email_domain() -> String {
    DEFAULT_SHIM_EMAIL_DOMAIN.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            backend_url: default_backend_url(),
            backend_publishable_key: default_backend_publishable_key(),
            app_scheme: default_app_scheme(),
            web_hosts: default_web_hosts(),
            content_resources: default_content_resources(),
            provider: ProviderSettings::default(),
            bridge_timeout_ms: default_bridge_timeout_ms(),
            shim_email_domain: default_shim_email_domain(),
            shim_secret: None,
        }
    }
}

impl Config {
    /// Load configuration from `<base>/config.json`, falling back to defaults,
    /// then apply environment overrides.
    pub fn load(paths: &Paths) -> CoreResult<Self> {
        let config_path = paths.config_file();

        let mut config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            Self::default()
        };

        config.load_from_env();
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from_file(path: &Path) -> CoreResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a file. The shim secret is never written.
    pub fn save(&self, paths: &Paths) -> CoreResult<()> {
        paths.ensure_dirs()?;
        let config_path = paths.config_file();
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    fn load_from_env(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from a key lookup. Empty values are ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        if let Some(log_level) = get(ENV_LOG_LEVEL) {
            self.log_level = log_level;
        }
        if let Some(url) = get(ENV_BACKEND_URL) {
            self.backend_url = url;
        }
        if let Some(key) = get(ENV_BACKEND_KEY) {
            self.backend_publishable_key = key;
        }
        if let Some(secret) = get(ENV_SHIM_SECRET) {
            self.shim_secret = Some(secret);
        }
    }

    /// Set the shim key material directly (tests and embedders).
    pub fn set_shim_secret(&mut self, secret: impl Into<String>) {
        self.shim_secret = Some(secret.into());
    }

    /// Reject configuration that would fail later in a less obvious place.
    pub fn validate(&self) -> CoreResult<()> {
        self.backend_url()?;
        if self.app_scheme.is_empty() || self.app_scheme.contains([':', '/']) {
            return Err(CoreError::Config(format!(
                "invalid app scheme: {:?}",
                self.app_scheme
            )));
        }
        if let Some(secret) = &self.shim_secret {
            check_shim_secret(secret)?;
        }
        Ok(())
    }

    /// Get the backend URL as a parsed URL.
    pub fn backend_url(&self) -> CoreResult<Url> {
        Url::parse(&self.backend_url).map_err(CoreError::from)
    }

    /// Shim key material, required by the OAuth shim.
    pub fn shim_secret(&self) -> CoreResult<&str> {
        let secret = self.shim_secret.as_deref().ok_or_else(|| {
            CoreError::Config(format!("{ENV_SHIM_SECRET} is not set"))
        })?;
        check_shim_secret(secret)?;
        Ok(secret)
    }

    /// Bridge round-trip bound. `None` waits forever.
    pub fn bridge_timeout(&self) -> Option<Duration> {
        self.bridge_timeout_ms.map(Duration::from_millis)
    }
}

fn check_shim_secret(secret: &str) -> CoreResult<()> {
    if secret.len() < MIN_SHIM_SECRET_LEN {
        return Err(CoreError::Config(format!(
            "{ENV_SHIM_SECRET} must be at least {MIN_SHIM_SECRET_LEN} bytes"
        )));
    }
    Ok(())
}
