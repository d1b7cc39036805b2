//! ironvault server binary.
//!
//! # Usage
//!
//! ```bash
//! # Print an example configuration and edit in real keys
//! ironvault config example > ironvault.toml
//!
//! # Run a standalone node
//! ironvault --config ironvault.toml
//!
//! # Flags and environment variables override the file
//! IRONVAULT_LOG_FORMAT=text ironvault --config ironvault.toml --state-dir /tmp/ironvault
//! ```

use std::{io::IsTerminal, process::ExitCode};

use clap::Parser;
use ironvault_server::{
    config::{self, Cli, CliCommand, Config, ConfigAction, LogFormat},
    shutdown,
};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Some(CliCommand::Config { action }) = &cli.command {
        let rendered = match action {
            ConfigAction::Schema => config::generate_config_schema(),
            ConfigAction::Example => config::generate_config_example(),
        };
        return match rendered {
            Ok(text) => {
                println!("{text}");
                ExitCode::SUCCESS
            },
            Err(e) => {
                eprintln!("{e}");
                ExitCode::FAILURE
            },
        };
    }

    let config = match cli.resolve() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        },
    };
    init_logging(&config);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), state_dir = %config.state_dir.display(), "starting ironvault");

    match ironvault_server::run_standalone(&config, shutdown::shutdown_signal()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "ironvault stopped with an error");
            ExitCode::FAILURE
        },
    }
}

/// Initializes the logging system.
///
/// - `Text`: human-readable lines
/// - `Json`: one JSON object per event
/// - `Auto`: JSON for non-TTY stdout, text otherwise
fn init_logging(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let use_json = match config.log_format {
        LogFormat::Json => true,
        LogFormat::Text => false,
        LogFormat::Auto => !std::io::stdout().is_terminal(),
    };

    if use_json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt::layer().json().flatten_event(true).with_current_span(false))
            .init();
    } else {
        tracing_subscriber::registry().with(env_filter).with(fmt::layer()).init();
    }
}
