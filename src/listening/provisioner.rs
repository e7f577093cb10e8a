//! Keyspace Schema Manager.

use super::schema::KEYSPACE;
use crate::wide_column::{Keyspace, StorageEngine, StorageError};
use std::sync::Arc;
use tracing::info;

/// Creates the keyspace and its tables when missing and validates them when
/// present. Safe to run on every startup.
pub struct SchemaProvisioner {
    engine: Arc<dyn StorageEngine>,
    keyspace: &'static Keyspace,
}

impl SchemaProvisioner {
    pub fn new(engine: Arc<dyn StorageEngine>) -> Self {
        Self::for_keyspace(engine, &KEYSPACE)
    }

    pub fn for_keyspace(engine: Arc<dyn StorageEngine>, keyspace: &'static Keyspace) -> Self {
        Self { engine, keyspace }
    }

    pub async fn provision(&self) -> Result<(), StorageError> {
        self.engine.create_keyspace(self.keyspace).await?;
        self.engine.use_keyspace(self.keyspace.name).await?;
        for table in self.keyspace.tables {
            self.engine.create_table(*table).await?;
        }
        info!(
            "Keyspace {} provisioned with {} tables",
            self.keyspace.name,
            self.keyspace.tables.len()
        );
        Ok(())
    }
}
