//! Core types, configuration, and utilities for the app shell host.

mod config;
mod error;
mod logging;
mod paths;

pub use config::{
    Config, ProviderSettings, DEFAULT_APP_SCHEME, DEFAULT_BACKEND_PUBLISHABLE_KEY,
    DEFAULT_BACKEND_URL, DEFAULT_BRIDGE_TIMEOUT_MS, DEFAULT_LOG_LEVEL, DEFAULT_SHIM_EMAIL_DOMAIN,
    MIN_SHIM_SECRET_LEN,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_for_command, parse_level};
pub use paths::Paths;
