//! Deterministic backend credentials for provider identities.
//!
//! The backend only offers a password primitive, so each `(provider,
//! provider_id)` pair maps to a fixed email and secret. The secret is an
//! HKDF-SHA256 expansion of deployment key material, so it cannot be
//! recomputed from the provider id alone.

use crate::{ShimError, ShimResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use shell_config_and_utils::{Config, MIN_SHIM_SECRET_LEN};

const HKDF_SALT: &[u8] = b"app-shell-shim-credential";
const HKDF_INFO_PREFIX: &[u8] = b"app-shell-shim-credential-v1";
const DERIVED_SECRET_LEN: usize = 32;

/// Email and secret used for the backend account of one provider identity.
#[derive(Clone, PartialEq, Eq)]
pub struct ShimCredential {
    pub derived_email: String,
    pub derived_secret: String,
}

impl std::fmt::Debug for ShimCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShimCredential")
            .field("derived_email", &self.derived_email)
            .field("derived_secret", &"[REDACTED]")
            .finish()
    }
}

/// Derives [`ShimCredential`]s from deployment key material.
pub struct CredentialDeriver {
    hkdf: Hkdf<Sha256>,
    email_domain: String,
}

impl CredentialDeriver {
    /// Build a deriver. `secret` must be at least 32 bytes.
    pub fn new(secret: &[u8], email_domain: impl Into<String>) -> ShimResult<Self> {
        if secret.len() < MIN_SHIM_SECRET_LEN {
            return Err(ShimError::Config(format!(
                "shim secret must be at least {MIN_SHIM_SECRET_LEN} bytes"
            )));
        }
        let email_domain = email_domain.into();
        if email_domain.is_empty() || email_domain.contains('@') {
            return Err(ShimError::Config(format!(
                "invalid shim email domain: {email_domain:?}"
            )));
        }

        Ok(Self {
            hkdf: Hkdf::<Sha256>::new(Some(HKDF_SALT), secret),
            email_domain,
        })
    }

    /// Build a deriver from the host configuration.
    pub fn from_config(config: &Config) -> ShimResult<Self> {
        let secret = config
            .shim_secret()
            .map_err(|e| ShimError::Config(e.to_string()))?;
        Self::new(secret.as_bytes(), config.shim_email_domain.clone())
    }

    /// Derive the credential for `(provider, provider_id)`.
    ///
    /// Pure: the same inputs always give the same output.
    pub fn derive(&self, provider: &str, provider_id: &str) -> ShimResult<ShimCredential> {
        if provider.is_empty() || provider_id.is_empty() {
            return Err(ShimError::Identity(
                "provider and provider id are required".to_string(),
            ));
        }

        // Provider names are case-insensitive; ids are not.
        let provider = provider.to_ascii_lowercase();
        let provider = provider.as_str();

        let mut info = Vec::with_capacity(HKDF_INFO_PREFIX.len() + provider.len() + provider_id.len() + 2);
        info.extend_from_slice(HKDF_INFO_PREFIX);
        info.push(0);
        info.extend_from_slice(provider.as_bytes());
        info.push(0);
        info.extend_from_slice(provider_id.as_bytes());

        let mut okm = [0u8; DERIVED_SECRET_LEN];
        self.hkdf
            .expand(&info, &mut okm)
            .map_err(|e| ShimError::Derivation(format!("HKDF expand failed: {e:?}")))?;

        Ok(ShimCredential {
            derived_email: format!(
                "{}@{}",
                email_local_part(provider, provider_id),
                self.email_domain
            ),
            derived_secret: URL_SAFE_NO_PAD.encode(okm),
        })
    }
}

/// Email local parts are case-folded by the backend, so uppercase ids must not
/// be kept verbatim.
fn is_safe_local(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
}

/// `<provider>_<id>`, with ids outside `[a-z0-9.-]` replaced by a digest.
fn email_local_part(provider: &str, provider_id: &str) -> String {
    let id = if is_safe_local(provider_id) {
        provider_id.to_string()
    } else {
        let digest = Sha256::digest(provider_id.as_bytes());
        digest[..8].iter().map(|b| format!("{b:02x}")).collect()
    };
    format!("{provider}_{id}")
}
