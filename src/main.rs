//! pmdeck: a web dashboard for PM2-managed services.
//!
//! This is the entry point of the application. It parses command-line arguments,
//! resolves settings from flags, environment and `pmdeck.toml`, and serves the
//! dashboard until interrupted.

mod config;
mod deploy;
mod errors;
mod exec;
mod http;
mod logging;
mod logs;
mod outcome;
mod pages;
mod process;
mod supervisor;

use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::builder::styling::{AnsiColor, Effects, Style};
use clap::builder::Styles;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use crate::config::{Config, Overrides, Settings};
use crate::deploy::DeployRunner;
use crate::exec::{CommandRunner, SystemRunner};
use crate::http::AppState;
use crate::logging::LogLevel;
use crate::logs::LogReader;
use crate::supervisor::Supervisor;

const DEFAULT_CONFIG_FILE: &str = "pmdeck.toml";

/// Command-line interface definition.
#[derive(Debug, Parser)]
#[command(
    name = "pmdeck",
    version,
    about = "Web dashboard for PM2 processes, logs and deployments",
    styles = help_styles()
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
    /// Path to pmdeck.toml configuration file.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Ignore any pmdeck.toml in the current directory.
    #[arg(long)]
    no_config: bool,
    /// Address to listen on.
    #[arg(long)]
    bind: Option<IpAddr>,
    /// Port to listen on.
    #[arg(long)]
    port: Option<u16>,
    /// Directory holding PM2 log files.
    #[arg(long)]
    log_dir: Option<PathBuf>,
    /// Log verbosity (overrides PMDECK_LOG).
    #[arg(long, value_enum)]
    log_level: Option<LogLevel>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Show version information.
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if let Some(Commands::Version) = cli.command {
        println!("pmdeck {}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    logging::init_logging(cli.log_level)?;
    let settings = load_settings(&cli)?;

    let runner: Arc<dyn CommandRunner> = Arc::new(SystemRunner);
    let supervisor = Arc::new(Supervisor::new(runner.clone(), &settings));
    let deployer = Arc::new(DeployRunner::new(supervisor.clone(), runner, &settings));
    let logs = Arc::new(LogReader::new(settings.log_dir.clone()));
    if !logs.dir().is_dir() {
        warn!(dir = %logs.dir().display(), "log directory does not exist yet");
    }
    let app = http::build_router(AppState {
        supervisor,
        deployer,
        logs,
    });

    let addr = SocketAddr::new(settings.bind, settings.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(
        addr = %addr,
        log_dir = %settings.log_dir.display(),
        "pmdeck listening"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("pmdeck stopped");
    Ok(())
}

fn load_settings(cli: &Cli) -> Result<Settings> {
    let mut config = Config::default();
    if !cli.no_config {
        let config_path = cli.config.clone().or_else(default_config_path);
        if let Some(path) = config_path {
            config = config::load_config(&path)?;
            info!(path = %path.display(), "loaded config file");
        }
    }
    let overrides = Overrides {
        bind: cli.bind,
        port: cli.port,
        log_dir: cli.log_dir.clone(),
    };
    Settings::resolve(overrides, config, |key| std::env::var(key).ok())
}

fn default_config_path() -> Option<PathBuf> {
    let path = Path::new(DEFAULT_CONFIG_FILE);
    if path.exists() {
        Some(path.to_path_buf())
    } else {
        None
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(err) => {
                warn!(error = %err, "cannot listen for SIGTERM");
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
            _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("received Ctrl-C, shutting down");
    }
}

fn help_styles() -> Styles {
    Styles::styled()
        .header(
            Style::new()
                .fg_color(Some(AnsiColor::Cyan.into()))
                .effects(Effects::BOLD),
        )
        .usage(
            Style::new()
                .fg_color(Some(AnsiColor::Green.into()))
                .effects(Effects::BOLD),
        )
        .literal(Style::new().fg_color(Some(AnsiColor::Yellow.into())))
        .placeholder(Style::new().fg_color(Some(AnsiColor::Magenta.into())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn parses_flags() {
        let cli = Cli::try_parse_from([
            "pmdeck",
            "--port",
            "8080",
            "--bind",
            "127.0.0.1",
            "--log-dir",
            "/var/log/pm2",
            "--log-level",
            "debug",
            "--no-config",
        ])
        .unwrap();
        assert_eq!(cli.port, Some(8080));
        assert_eq!(cli.bind, Some(IpAddr::from([127, 0, 0, 1])));
        assert_eq!(cli.log_level, Some(LogLevel::Debug));
        assert!(cli.no_config);
        assert!(cli.command.is_none());
    }

    #[test]
    fn version_is_a_subcommand() {
        let cli = Cli::try_parse_from(["pmdeck", "version"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Version)));
        assert!(Cli::try_parse_from(["pmdeck", "--port", "http"]).is_err());
    }

    #[test]
    fn explicit_config_file_feeds_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        fs::write(&path, "port = 4100\nlog_dir = \"/tmp/pm2-logs\"\n").unwrap();

        let cli = Cli::try_parse_from([
            "pmdeck",
            "--config",
            path.to_str().unwrap(),
            "--port",
            "4200",
        ])
        .unwrap();
        let overrides = Overrides {
            bind: cli.bind,
            port: cli.port,
            log_dir: cli.log_dir.clone(),
        };
        let config = config::load_config(cli.config.as_deref().unwrap()).unwrap();
        let settings = Settings::resolve(overrides, config, |_| None).unwrap();
        assert_eq!(settings.port, 4200);
        assert_eq!(settings.log_dir, PathBuf::from("/tmp/pm2-logs"));
    }

    #[test]
    fn broken_config_file_is_reported_with_its_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pmdeck.toml");
        fs::write(&path, "port = \"not a number\"\n").unwrap();
        let cli = Cli::try_parse_from(["pmdeck", "--config", path.to_str().unwrap()]).unwrap();
        let err = load_settings(&cli).unwrap_err();
        assert!(format!("{:#}", err).contains("pmdeck.toml"));
    }
}
