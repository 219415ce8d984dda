use anyhow::{Context, Result};
use clap::Parser;
use confstore_core::config::Config;
use confstore_core::logging::{init_logging_with_config, LogConfig, LogLevel};
use confstore_core::metrics::init_metrics;
use confstore_core::node::build_engine;
use confstore_core::shutdown::{install_signal_handlers, ShutdownCoordinator};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "confstore")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML configuration file; defaults plus CONFSTORE_* variables otherwise
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<LogLevel>,

    /// Enable JSON formatted logging
    #[arg(long)]
    json_logs: bool,

    /// Time allowed for the engine to stop after a signal
    #[arg(long, default_value = "10s", value_parser = humantime_duration)]
    drain_timeout: Duration,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Parser, Debug)]
enum Command {
    /// Run the node until SIGINT/SIGTERM (default)
    Run,
    /// Load and validate configuration, then print it
    CheckConfig,
}

fn humantime_duration(s: &str) -> Result<Duration, String> {
    s.parse::<humantime::Duration>()
        .map(Into::into)
        .map_err(|e| e.to_string())
}

fn load_config(args: &Args) -> Result<Config> {
    let config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env().context("loading configuration from environment")?,
    };
    Ok(config)
}

fn log_config(args: &Args, config: &Config) -> Result<LogConfig> {
    let mut log = LogConfig::try_from(&config.logging)?;
    if let Some(level) = args.log_level {
        log.level = level;
    }
    if args.json_logs {
        log.json_format = true;
    }
    Ok(log)
}

async fn run(config: Config, drain_timeout: Duration) -> Result<()> {
    if config.metrics.enabled {
        init_metrics();
    }

    let engine = build_engine(&config)?;
    engine.start().await?;
    info!(store_uuid = %engine.store_uuid(), "confidential store node running");

    let coordinator = Arc::new(ShutdownCoordinator::new(drain_timeout));
    install_signal_handlers(coordinator.clone()).context("installing signal handlers")?;

    coordinator.wait_for_shutdown().await;
    coordinator.stop_engine(&engine).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    init_logging_with_config(log_config(&args, &config)?)?;

    match args.command {
        Some(Command::CheckConfig) => {
            println!("{}", toml::to_string_pretty(&config)?);
            info!("configuration is valid");
        }
        Some(Command::Run) | None => run(config, args.drain_timeout).await?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_args() {
        let args = Args::try_parse_from([
            "confstore",
            "--config",
            "node.toml",
            "--log-level",
            "debug",
            "--drain-timeout",
            "3s",
            "check-config",
        ])
        .unwrap();

        assert_eq!(args.config, Some(PathBuf::from("node.toml")));
        assert_eq!(args.log_level, Some(LogLevel::Debug));
        assert_eq!(args.drain_timeout, Duration::from_secs(3));
        assert!(matches!(args.command, Some(Command::CheckConfig)));
    }

    #[test]
    fn test_bad_log_level_is_rejected() {
        assert!(Args::try_parse_from(["confstore", "--log-level", "loud"]).is_err());
    }

    #[test]
    fn test_cli_overrides_file_logging() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.toml");
        std::fs::write(&path, "[logging]\nlevel = \"warn\"\n").unwrap();

        let args = Args::try_parse_from([
            "confstore",
            "--config",
            path.to_str().unwrap(),
            "--json-logs",
        ])
        .unwrap();
        let config = load_config(&args).unwrap();
        let log = log_config(&args, &config).unwrap();

        assert_eq!(log.level, LogLevel::Warn);
        assert!(log.json_format);
    }

    #[test]
    fn test_missing_config_file() {
        let args = Args::try_parse_from(["confstore", "--config", "/nonexistent/node.toml"]).unwrap();
        assert!(load_config(&args).is_err());
    }
}
