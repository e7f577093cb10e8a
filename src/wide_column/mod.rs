//! A small partitioned wide-column storage abstraction and its SQLite engine.

mod engine;
mod schema;
mod sqlite_engine;
mod statement;
mod value;

pub use engine::{StorageEngine, StorageError};
pub use schema::{
    ClusteringColumn, ClusteringOrder, Column, ColumnType, Keyspace, TableSchema, BASE_DB_VERSION,
    DATE_FORMAT,
};
pub use sqlite_engine::SqliteEngine;
pub use statement::{Batch, Delete, Mutation, PartitionRef, Select, Statement, Upsert};
pub use value::{FromRow, Row, Value};
