//! Listening statistics kept as denormalized views over a partitioned
//! wide-column store.
//!
//! This library exposes the internal modules for the binaries and for testing.

pub mod bulk_import;
pub mod config;
pub mod listening;
pub mod server;
pub mod wide_column;

// Re-export commonly used types for convenience
pub use listening::{AggregateMaintainer, ListeningError, MaintainerConfig, SchemaProvisioner};
pub use server::{make_app, run_server, RequestsLoggingLevel};
pub use wide_column::{SqliteEngine, StorageEngine};

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;

/// Opens the storage engine (on disk when `db_dir` is given, in memory
/// otherwise) and provisions the listening keyspace.
pub async fn open_storage(db_dir: Option<&Path>) -> Result<Arc<dyn StorageEngine>> {
    let engine: Arc<dyn StorageEngine> = match db_dir {
        Some(dir) => Arc::new(
            SqliteEngine::open(dir)
                .with_context(|| format!("Failed to open storage at {:?}", dir))?,
        ),
        None => Arc::new(SqliteEngine::open_in_memory()?),
    };
    SchemaProvisioner::new(engine.clone())
        .provision()
        .await
        .context("Failed to provision keyspace")?;
    Ok(engine)
}
