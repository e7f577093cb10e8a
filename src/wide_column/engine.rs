use super::schema::{Keyspace, TableSchema};
use super::statement::{Batch, Statement};
use super::value::Row;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("Storage operation timed out")]
    Timeout,

    #[error("Invalid statement: {0}")]
    InvalidStatement(String),

    #[error("Cannot decode column {column}: {reason}")]
    Decode {
        column: &'static str,
        reason: String,
    },

    #[error("Table {table} does not match its declaration: {reason}")]
    SchemaMismatch { table: &'static str, reason: String },

    #[error("Keyspace {name} is at version {found}, expected {expected}")]
    KeyspaceVersion {
        name: &'static str,
        found: i64,
        expected: usize,
    },

    #[error("No keyspace selected")]
    KeyspaceNotSelected,

    #[error("Unknown keyspace: {0}")]
    UnknownKeyspace(String),

    #[error("Storage engine is closed")]
    Closed,
}

impl From<tokio::task::JoinError> for StorageError {
    fn from(e: tokio::task::JoinError) -> Self {
        StorageError::Unavailable(format!("storage task failed: {}", e))
    }
}

impl From<tokio::time::error::Elapsed> for StorageError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        StorageError::Timeout
    }
}

/// Capabilities a partitioned wide-column store has to offer.
///
/// Implementations are shared behind an `Arc<dyn StorageEngine>` that is
/// opened once at startup and closed at shutdown.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Creates the keyspace if absent. Running it again with the same
    /// declaration has no effect.
    async fn create_keyspace(&self, keyspace: &'static Keyspace) -> Result<(), StorageError>;

    /// Selects the keyspace addressed by all following statements.
    async fn use_keyspace(&self, name: &str) -> Result<(), StorageError>;

    /// Creates the table in the current keyspace if absent, otherwise checks
    /// that the existing table matches the declaration.
    async fn create_table(&self, table: &'static TableSchema) -> Result<(), StorageError>;

    /// Runs a single read or write. Writes return no rows.
    async fn execute(&self, statement: Statement) -> Result<Vec<Row>, StorageError>;

    /// Applies all mutations in order as one unit, or none of them.
    async fn batch(&self, batch: Batch) -> Result<(), StorageError>;

    /// Releases the underlying connection. Later calls fail with `Closed`.
    async fn close(&self) -> Result<(), StorageError>;
}
