use anyhow::{Context, Result};
use clap::Parser;
use listening_views::config::{AppConfig, CliConfig, FileConfig};
use listening_views::server::metrics;
use listening_views::{open_storage, run_server, AggregateMaintainer, RequestsLoggingLevel};
use std::{fmt::Debug, path::PathBuf};
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let resolved = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if resolved.is_absolute() {
        return Ok(resolved);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(resolved))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding one SQLite database per keyspace. Without it all
    /// data lives in memory and is lost on exit.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3001)]
    pub port: u16,

    /// The level of logging to perform on each request.
    #[clap(long, default_value = "path")]
    pub logging_level: RequestsLoggingLevel,

    /// Upper bound in milliseconds for reading a prior total before a play is applied.
    #[clap(long)]
    pub read_timeout_ms: Option<u64>,

    /// Path to a TOML config file. Its values override the CLI ones.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        port: cli_args.port,
        logging_level: cli_args.logging_level.clone(),
        read_timeout_ms: cli_args.read_timeout_ms,
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    match &config.db_dir {
        Some(dir) => info!("Opening storage at {:?}...", dir),
        None => info!("No db_dir configured, keeping all data in memory"),
    }
    let engine = open_storage(config.db_dir.as_deref()).await?;
    let maintainer = AggregateMaintainer::new(engine.clone(), config.maintainer.clone());

    info!("Ready to serve at port {}!", config.port);
    let served = run_server(
        maintainer,
        config.logging_level.clone(),
        config.port,
        shutdown_signal(),
    )
    .await;

    info!("Closing storage...");
    if let Err(e) = engine.close().await {
        error!("Failed to close storage cleanly: {}", e);
    }
    served
}
