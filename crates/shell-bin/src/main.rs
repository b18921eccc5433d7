//! App shell host - session, deep link and native bridge runtime.

mod app;
mod auth;
mod bridge;
mod link;

use std::path::PathBuf;

use app::HostState;
use clap::{Parser, Subcommand};
use shell_config_and_utils::{init_logging, init_logging_for_command, Config, Paths};

/// App shell host command-line interface.
#[derive(Parser)]
#[command(name = "app-shell-host")]
#[command(about = "App shell host for sessions, deep links and the native bridge")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Base directory for runtime files (session, logs, config). Defaults to ~/.app-shell
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Use an in-process backend. Accounts only live for this run.
    #[arg(long, global = true)]
    offline: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current session
    Status,
    /// Sign in with email and password
    Login {
        #[arg(long)]
        email: String,
        #[arg(long, env = "APP_SHELL_PASSWORD", hide_env_values = true)]
        password: String,
    },
    /// Sign out, clearing the stored session even if the backend is unreachable
    Logout,
    /// Sign in through the identity provider. Without --code, print the authorize URL
    ShimLogin {
        /// Authorization code from the provider redirect
        #[arg(long)]
        code: Option<String>,
    },
    /// Route a deep link
    OpenLink { uri: String },
    /// Native bridge commands
    Bridge {
        #[command(subcommand)]
        command: BridgeCommands,
    },
}

#[derive(Subcommand)]
enum BridgeCommands {
    /// Serve NDJSON requests from stdin, writing reply scripts to stdout
    Serve {
        /// Report this position for LOCATION requests ("lat,lon")
        #[arg(long, value_parser = parse_location)]
        fixed_location: Option<(f64, f64)>,
    },
    /// Send one request through an in-process client and host
    Call {
        feature_type: String,
        action: String,
        /// JSON payload
        #[arg(long)]
        payload: Option<String>,
        /// Report this position for LOCATION requests ("lat,lon")
        #[arg(long, value_parser = parse_location)]
        fixed_location: Option<(f64, f64)>,
    },
}

fn parse_location(value: &str) -> Result<(f64, f64), String> {
    let (lat, lon) = value
        .split_once(',')
        .ok_or_else(|| "expected \"lat,lon\"".to_string())?;
    let lat: f64 = lat.trim().parse().map_err(|e| format!("latitude: {e}"))?;
    let lon: f64 = lon.trim().parse().map_err(|e| format!("longitude: {e}"))?;
    if !(-90.0..=90.0).contains(&lat) || !(-180.0..=180.0).contains(&lon) {
        return Err("coordinates out of range".to_string());
    }
    Ok((lat, lon))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };

    // The long-running bridge also writes the JSONL log file.
    match &cli.command {
        Commands::Bridge {
            command: BridgeCommands::Serve { .. },
        } => init_logging(&cli.log_level, paths.host_log_file()),
        _ => init_logging_for_command(&cli.log_level),
    }

    let config = Config::load(&paths)?;
    let state = HostState::build(config, &paths, cli.offline)?;

    let result = match cli.command {
        Commands::Status => auth::status(&state).await,
        Commands::Login { email, password } => auth::login(&state, &email, &password).await,
        Commands::Logout => auth::logout(&state).await,
        Commands::ShimLogin { code } => auth::shim_login(&state, code.as_deref()).await,
        Commands::OpenLink { uri } => link::open_link(&state, &uri).await,
        Commands::Bridge { command } => match command {
            BridgeCommands::Serve { fixed_location } => bridge::serve(&state, fixed_location).await,
            BridgeCommands::Call {
                feature_type,
                action,
                payload,
                fixed_location,
            } => {
                bridge::call(
                    &state,
                    &feature_type,
                    &action,
                    payload.as_deref(),
                    fixed_location,
                )
                .await
            }
        },
    };

    state.session.shutdown();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_location() {
        assert_eq!(parse_location("37.56, 126.97"), Ok((37.56, 126.97)));
        assert!(parse_location("37.56").is_err());
        assert!(parse_location("91,0").is_err());
        assert!(parse_location("north,east").is_err());
    }

    #[test]
    fn test_cli_parses_bridge_call() {
        let cli = Cli::try_parse_from([
            "app-shell-host",
            "--offline",
            "bridge",
            "call",
            "DEVICE",
            "GET_INFO",
            "--payload",
            "{}",
        ])
        .unwrap();
        assert!(cli.offline);
        assert!(matches!(
            cli.command,
            Commands::Bridge {
                command: BridgeCommands::Call { .. }
            }
        ));
    }
}
