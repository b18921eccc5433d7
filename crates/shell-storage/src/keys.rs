//! Storage key constants.

/// Well-known keys for the persisted session.
pub struct StorageKeys;

impl StorageKeys {
    /// Backend access token
    pub const SESSION_ACCESS_TOKEN: &'static str = "session_access_token";

    /// Backend refresh token
    pub const SESSION_REFRESH_TOKEN: &'static str = "session_refresh_token";

    /// Session metadata (JSON)
    pub const SESSION_META: &'static str = "session_meta";

    /// Every key owned by the session, in deletion order.
    pub const SESSION_KEYS: [&'static str; 3] = [
        Self::SESSION_ACCESS_TOKEN,
        Self::SESSION_REFRESH_TOKEN,
        Self::SESSION_META,
    ];
}
