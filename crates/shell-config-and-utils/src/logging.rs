//! Logging initialization for the host.
//!
//! All host commands go through the observability crate, which writes
//! structured JSONL to `~/.app-shell/logs/host.jsonl`.

use std::path::PathBuf;

const SERVICE_NAME: &str = "app-shell-host";

/// Initialize logging for the long-running host (bridge loop).
///
/// Logs go to the JSONL file at `log_path` and to stderr. `RUST_LOG`
/// overrides `level` when set.
pub fn init_logging(level: &str, log_path: PathBuf) {
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        log_path: Some(log_path),
        json_file: true,
        also_stderr: true,
    });
}

/// Initialize stderr-only logging for one-shot CLI commands.
pub fn init_logging_for_command(level: &str) {
    observability::init_with_config(observability::LogConfig {
        service_name: SERVICE_NAME.into(),
        default_level: level.into(),
        json_file: false,
        also_stderr: true,
        ..Default::default()
    });
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_level_all_variants() {
        assert_eq!(parse_level("trace"), tracing::Level::TRACE);
        assert_eq!(parse_level("debug"), tracing::Level::DEBUG);
        assert_eq!(parse_level("info"), tracing::Level::INFO);
        assert_eq!(parse_level("warn"), tracing::Level::WARN);
        assert_eq!(parse_level("warning"), tracing::Level::WARN);
        assert_eq!(parse_level("ERROR"), tracing::Level::ERROR);
    }

    #[test]
    fn parse_level_unknown_defaults_to_info() {
        assert_eq!(parse_level(""), tracing::Level::INFO);
        assert_eq!(parse_level("verbose"), tracing::Level::INFO);
    }
}
