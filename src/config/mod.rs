mod file_config;

pub use file_config::{FileConfig, MaintainerFileConfig};

use crate::listening::maintainer::{DEFAULT_READ_TIMEOUT, DEFAULT_TOP_LIMIT};
use crate::listening::MaintainerConfig;
use crate::server::RequestsLoggingLevel;
use anyhow::{bail, Result};
use clap::ValueEnum;
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub read_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Directory holding one database per keyspace. `None` keeps everything in memory.
    pub db_dir: Option<PathBuf>,
    pub port: u16,
    pub logging_level: RequestsLoggingLevel,
    pub maintainer: MaintainerConfig,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file.db_dir.map(PathBuf::from).or_else(|| cli.db_dir.clone());
        if let Some(db_dir) = &db_dir {
            if !db_dir.exists() {
                bail!("Database directory does not exist: {:?}", db_dir);
            }
            if !db_dir.is_dir() {
                bail!("db_dir is not a directory: {:?}", db_dir);
            }
        }

        let port = file.port.unwrap_or(cli.port);

        let logging_level = file
            .logging_level
            .and_then(|s| parse_logging_level(&s))
            .unwrap_or_else(|| cli.logging_level.clone());

        let maintainer_file = file.maintainer.unwrap_or_default();
        let read_timeout = maintainer_file
            .read_timeout_ms
            .or(cli.read_timeout_ms)
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_READ_TIMEOUT);
        if read_timeout.is_zero() {
            bail!("read_timeout_ms must be greater than zero");
        }
        let top_limit = maintainer_file.top_limit.unwrap_or(DEFAULT_TOP_LIMIT);
        if top_limit == 0 {
            bail!("top_limit must be greater than zero");
        }

        Ok(Self {
            db_dir,
            port,
            logging_level,
            maintainer: MaintainerConfig {
                read_timeout,
                top_limit,
            },
        })
    }
}

/// Parses a logging level string into RequestsLoggingLevel.
/// Uses clap's ValueEnum trait for parsing.
fn parse_logging_level(s: &str) -> Option<RequestsLoggingLevel> {
    RequestsLoggingLevel::from_str(s, true).ok()
}
