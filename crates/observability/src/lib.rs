//! # Observability
//!
//! Logging layer shared by every crate in the app shell workspace.
//!
//! Library crates only emit `tracing` events. The host binary calls
//! [`init_with_config`] once at startup, which installs:
//!
//! - a JSONL file layer (`~/.app-shell/logs/host.jsonl` by default)
//! - an optional compact stderr layer for foreground runs
//!
//! Field values whose key names a credential (`access_token`, `secret`,
//! `password`, ...) are redacted before they reach the file.
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "app-shell-host".into(),
//!     default_level: "debug".into(),
//!     also_stderr: true,
//!     ..Default::default()
//! });
//! tracing::info!("ready");
//! ```

mod file_writer;
mod json_layer;

use std::path::PathBuf;

pub use file_writer::CentralLogWriter;
pub use json_layer::{is_sensitive_key, LogEntry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the service, included in every log line.
    pub service_name: String,

    /// Default level filter. `RUST_LOG` takes precedence when set.
    pub default_level: String,

    /// Custom JSONL file path. Defaults to `~/.app-shell/logs/host.jsonl`.
    pub log_path: Option<PathBuf>,

    /// Write the JSONL file at all. Disabled for short-lived CLI commands.
    pub json_file: bool,

    /// Also emit compact logs to stderr.
    pub also_stderr: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            json_file: true,
            also_stderr: false,
        }
    }
}

/// Initialize logging with default settings for `service_name`.
pub fn init(service_name: &str) {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    });
}

/// Initialize logging with custom configuration.
///
/// Calling this more than once is harmless: the first subscriber wins.
pub fn init_with_config(config: LogConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;
    use tracing_subscriber::{EnvFilter, Layer};

    let env_filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.default_level))
    };

    let log_path = config.log_path.clone().or_else(default_log_path);
    let writer = if config.json_file {
        match log_path.as_ref().map(CentralLogWriter::new) {
            Some(Ok(writer)) => Some(writer),
            Some(Err(e)) => {
                eprintln!("observability: failed to open log file: {e}");
                None
            }
            None => None,
        }
    } else {
        None
    };

    let json_layer = writer.map(|writer| {
        json_layer::JsonLayer::new(config.service_name.clone(), writer).with_filter(env_filter())
    });

    // Without a file there is nothing else to show the operator, so stderr is forced on.
    let stderr_enabled = config.also_stderr || json_layer.is_none();
    let stderr_layer = stderr_enabled.then(|| {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .compact()
            .with_writer(std::io::stderr)
            .with_filter(env_filter())
    });

    let installed = tracing_subscriber::registry()
        .with(json_layer)
        .with(stderr_layer)
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(
            service = %config.service_name,
            log_path = ?log_path,
            "observability initialized"
        );
    }
}

fn default_log_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".app-shell").join("logs").join("host.jsonl"))
}

pub use tracing::{debug, error, info, instrument, trace, warn, Level};
