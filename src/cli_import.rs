//! Bulk Import Tool
//!
//! Loads listeners, tracks and plays from CSV files into the listening
//! keyspace, applying every play through the same maintenance path the
//! server uses.

use anyhow::{Context, Result};
use clap::Parser;
use listening_views::bulk_import::{BulkImporter, ImportKind, ImportReport};
use listening_views::listening::maintainer::DEFAULT_READ_TIMEOUT;
use listening_views::{open_storage, AggregateMaintainer, MaintainerConfig};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "cli-import")]
#[command(about = "Import listeners, tracks and plays from CSV files")]
struct Args {
    /// Directory holding the keyspace databases
    #[arg(long, value_name = "DB_DIR")]
    db_dir: PathBuf,

    /// CSV with listener_id,name,city columns
    #[arg(long)]
    listeners: Option<PathBuf>,

    /// CSV with track_id,artist,title,genre,duration columns
    #[arg(long)]
    tracks: Option<PathBuf>,

    /// CSV with listener_id,track_id,date and an optional minutes column
    #[arg(long)]
    plays: Option<PathBuf>,

    /// Upper bound in milliseconds for reading a prior total
    #[arg(long)]
    read_timeout_ms: Option<u64>,
}

fn log_report(kind: &str, report: &ImportReport) {
    info!("{} imported: {}", kind, report.imported);
    if report.skipped > 0 {
        warn!("{} skipped: {}", kind, report.skipped);
    }
    if report.failed > 0 {
        warn!("{} failed: {}", kind, report.failed);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    info!("Bulk Import Tool");
    info!("================");
    info!("Database directory: {}", args.db_dir.display());

    if !args.db_dir.is_dir() {
        std::fs::create_dir_all(&args.db_dir)
            .with_context(|| format!("Failed to create {}", args.db_dir.display()))?;
    }

    let engine = open_storage(Some(&args.db_dir)).await?;
    let config = MaintainerConfig {
        read_timeout: args
            .read_timeout_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_READ_TIMEOUT),
        ..Default::default()
    };
    let importer = BulkImporter::new(AggregateMaintainer::new(engine.clone(), config));

    // Entities first so plays can resolve them.
    let steps = [
        (ImportKind::Listeners, "Listeners", &args.listeners),
        (ImportKind::Tracks, "Tracks", &args.tracks),
        (ImportKind::Plays, "Plays", &args.plays),
    ];
    let mut imported_anything = false;
    for (kind, label, path) in steps {
        let Some(path) = path else {
            continue;
        };
        let report = importer
            .import_path(kind, path)
            .await
            .with_context(|| format!("Failed to import {}", path.display()))?;
        log_report(label, &report);
        imported_anything = true;
    }

    if !imported_anything {
        warn!("Nothing to import: pass --listeners, --tracks and/or --plays");
    }

    engine.close().await?;
    info!("Import completed!");
    Ok(())
}
