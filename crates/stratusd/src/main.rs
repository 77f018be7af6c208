//! stratusd: Stratus sync root daemon
//!
//! Usage:
//!   stratusd [--config stratus.toml] [serve]
//!   stratusd unregister
//!   stratusd dehydrate <PATH>...
//!
//! Commands:
//!   serve       - Register, connect, populate and hydrate on demand [default]
//!   unregister  - Remove the sync root registration
//!   dehydrate   - Evict local content of placeholders

mod daemon;
mod remote;
mod sync;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};
use stratus_cloudfilter::SyncRootProvider;
use stratus_core::config::StratusConfig;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "stratusd", version, about = "Stratus Cloud Files sync root daemon")]
struct Cli {
    /// Path to stratus.toml configuration file
    #[arg(long, short = 'c', env = "STRATUS_CONFIG", default_value = "stratus.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides daemon.log_level
    #[arg(long, env = "STRATUS_LOG")]
    log: Option<String>,

    /// Log format (json, text); overrides daemon.log_format
    #[arg(long, env = "STRATUS_LOG_FORMAT")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
enum Command {
    /// Serve the sync root until interrupted (default)
    Serve,
    /// Remove the sync root registration; placeholders lose their cloud state
    Unregister,
    /// Discard local content of the given files, keeping the placeholders
    Dehydrate {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (config, found) = load_config(&cli.config).await?;

    let level = cli.log.clone().unwrap_or_else(|| config.daemon.log_level.clone());
    let format = cli
        .log_format
        .clone()
        .unwrap_or(match config.daemon.log_format.as_str() {
            "json" => LogFormat::Json,
            _ => LogFormat::Text,
        });
    init_logging(&level, &format);

    if !found {
        warn!("config file not found: {}  (using defaults)", cli.config.display());
    }
    config.validate()?;

    let command = cli.command.unwrap_or(Command::Serve);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        command = ?command,
        config = %cli.config.display(),
        root = %config.sync_root.path.display(),
        "stratusd starting"
    );

    match command {
        Command::Serve => daemon::run(config).await,
        Command::Unregister => {
            SyncRootProvider::native()?
                .registrar()
                .unregister(&config.sync_root.path)?;
            info!(root = %config.sync_root.path.display(), "sync root unregistered");
            Ok(())
        }
        Command::Dehydrate { paths } => dehydrate(&paths),
    }
}

fn dehydrate(paths: &[PathBuf]) -> Result<()> {
    let placeholders = SyncRootProvider::native()?.placeholders();
    let mut failed = 0usize;
    for path in paths {
        if let Err(e) = placeholders.dehydrate(path) {
            error!(path = %path.display(), "dehydrate failed: {e}");
            failed += 1;
        }
    }
    if failed > 0 {
        anyhow::bail!("{failed} of {} files could not be dehydrated", paths.len());
    }
    Ok(())
}

/// Parse the config file, or defaults when it does not exist. The flag
/// lets the caller warn once logging is up.
async fn load_config(path: &Path) -> Result<(StratusConfig, bool)> {
    if path.exists() {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("reading config {}: {e}", path.display()))?;
        let config = toml::from_str(&content)
            .map_err(|e| anyhow::anyhow!("parsing config {}: {e}", path.display()))?;
        Ok((config, true))
    } else {
        Ok((StratusConfig::default(), false))
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
