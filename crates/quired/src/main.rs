//! quired: quire notes daemon
//!
//! Usage:
//!   quired [--config /etc/quire/quire.toml] [--log debug] [--log-format json]

mod daemon;
mod metrics;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use quire_core::config::QuireConfig;
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "quired", version, about = "quire notes daemon")]
struct Cli {
    /// Path to quire.toml configuration file
    #[arg(
        long,
        short = 'c',
        env = "QUIRE_CONFIG",
        default_value = "/etc/quire/quire.toml"
    )]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides [daemon] log_level
    #[arg(long, env = "QUIRE_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides [daemon] log_format
    #[arg(long, env = "QUIRE_LOG_FORMAT")]
    log_format: Option<LogFormat>,
}

#[derive(Clone, Debug, ValueEnum, PartialEq)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_found = cli.config.exists();
    let config = QuireConfig::load(&cli.config)?;

    let level = cli.log.as_deref().unwrap_or(&config.daemon.log_level);
    let format = cli
        .log_format
        .clone()
        .unwrap_or_else(|| log_format_from_config(&config.daemon.log_format));
    init_logging(level, &format);

    if !config_found {
        tracing::warn!(
            "config file not found: {}  (using defaults)",
            cli.config.display()
        );
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %cli.config.display(),
        "quired starting"
    );

    daemon::run(config).await
}

fn log_format_from_config(value: &str) -> LogFormat {
    if value.eq_ignore_ascii_case("json") {
        LogFormat::Json
    } else {
        LogFormat::Text
    }
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json())
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer())
                .init();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from(["quired", "-c", "/tmp/q.toml", "--log", "debug", "--log-format", "json"])
            .unwrap();
        assert_eq!(cli.config, PathBuf::from("/tmp/q.toml"));
        assert_eq!(cli.log.as_deref(), Some("debug"));
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn test_log_format_from_config() {
        assert_eq!(log_format_from_config("JSON"), LogFormat::Json);
        assert_eq!(log_format_from_config("text"), LogFormat::Text);
        assert_eq!(log_format_from_config("pretty"), LogFormat::Text);
    }
}
