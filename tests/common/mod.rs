//! Common test infrastructure
//!
//! Fixtures for a provisioned in-memory store plus two engine wrappers:
//! [`RecordingEngine`] counts what reaches storage and [`FaultyEngine`]
//! makes chosen reads fail or stall.

#![allow(dead_code)]

use async_trait::async_trait;
use listening_views::listening::Minutes;
use listening_views::wide_column::{Batch, Keyspace, Row, Statement, TableSchema};
use listening_views::{
    AggregateMaintainer, MaintainerConfig, SchemaProvisioner, SqliteEngine, StorageEngine,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use listening_views::wide_column::StorageError;

pub fn minutes(raw: &str) -> Minutes {
    Minutes::parse("minutes", raw).unwrap()
}

/// An in-memory engine with the listening keyspace provisioned and selected.
pub async fn provisioned_engine() -> Arc<dyn StorageEngine> {
    let engine: Arc<dyn StorageEngine> = Arc::new(SqliteEngine::open_in_memory().unwrap());
    SchemaProvisioner::new(engine.clone())
        .provision()
        .await
        .unwrap();
    engine
}

pub fn maintainer_with(engine: Arc<dyn StorageEngine>) -> AggregateMaintainer {
    AggregateMaintainer::new(engine, MaintainerConfig::default())
}

pub async fn maintainer() -> AggregateMaintainer {
    maintainer_with(provisioned_engine().await)
}

/// Passes everything through and counts batches and mutations.
pub struct RecordingEngine {
    inner: Arc<dyn StorageEngine>,
    batches: AtomicUsize,
    mutations: AtomicUsize,
    deletes: AtomicUsize,
}

impl RecordingEngine {
    pub fn wrap(inner: Arc<dyn StorageEngine>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            batches: AtomicUsize::new(0),
            mutations: AtomicUsize::new(0),
            deletes: AtomicUsize::new(0),
        })
    }

    pub fn batches(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    pub fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn deletes(&self) -> usize {
        self.deletes.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.batches.store(0, Ordering::SeqCst);
        self.mutations.store(0, Ordering::SeqCst);
        self.deletes.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageEngine for RecordingEngine {
    async fn create_keyspace(&self, keyspace: &'static Keyspace) -> Result<(), StorageError> {
        self.inner.create_keyspace(keyspace).await
    }

    async fn use_keyspace(&self, name: &str) -> Result<(), StorageError> {
        self.inner.use_keyspace(name).await
    }

    async fn create_table(&self, table: &'static TableSchema) -> Result<(), StorageError> {
        self.inner.create_table(table).await
    }

    async fn execute(&self, statement: Statement) -> Result<Vec<Row>, StorageError> {
        if let Statement::Mutation(mutation) = &statement {
            self.mutations.fetch_add(1, Ordering::SeqCst);
            if mutation.is_delete() {
                self.deletes.fetch_add(1, Ordering::SeqCst);
            }
        }
        self.inner.execute(statement).await
    }

    async fn batch(&self, batch: Batch) -> Result<(), StorageError> {
        self.batches.fetch_add(1, Ordering::SeqCst);
        self.mutations.fetch_add(batch.len(), Ordering::SeqCst);
        let deletes = batch.mutations().iter().filter(|m| m.is_delete()).count();
        self.deletes.fetch_add(deletes, Ordering::SeqCst);
        self.inner.batch(batch).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.inner.close().await
    }
}

/// Fails or stalls reads of selected tables, and optionally every batch.
pub struct FaultyEngine {
    inner: Arc<dyn StorageEngine>,
    failing_reads: Mutex<HashSet<&'static str>>,
    stalled_reads: Mutex<HashSet<&'static str>>,
    fail_batches: AtomicBool,
}

impl FaultyEngine {
    pub fn wrap(inner: Arc<dyn StorageEngine>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            failing_reads: Mutex::new(HashSet::new()),
            stalled_reads: Mutex::new(HashSet::new()),
            fail_batches: AtomicBool::new(false),
        })
    }

    pub fn fail_reads_of(&self, table: &'static TableSchema) {
        self.failing_reads.lock().unwrap().insert(table.name);
    }

    pub fn stall_reads_of(&self, table: &'static TableSchema) {
        self.stalled_reads.lock().unwrap().insert(table.name);
    }

    pub fn heal(&self) {
        self.failing_reads.lock().unwrap().clear();
        self.stalled_reads.lock().unwrap().clear();
        self.fail_batches.store(false, Ordering::SeqCst);
    }

    pub fn fail_batches(&self) {
        self.fail_batches.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl StorageEngine for FaultyEngine {
    async fn create_keyspace(&self, keyspace: &'static Keyspace) -> Result<(), StorageError> {
        self.inner.create_keyspace(keyspace).await
    }

    async fn use_keyspace(&self, name: &str) -> Result<(), StorageError> {
        self.inner.use_keyspace(name).await
    }

    async fn create_table(&self, table: &'static TableSchema) -> Result<(), StorageError> {
        self.inner.create_table(table).await
    }

    async fn execute(&self, statement: Statement) -> Result<Vec<Row>, StorageError> {
        if let Statement::Select(select) = &statement {
            let table = select.table.name;
            if self.failing_reads.lock().unwrap().contains(table) {
                return Err(StorageError::Unavailable(format!("{} is down", table)));
            }
            let stalled = self.stalled_reads.lock().unwrap().contains(table);
            if stalled {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
        }
        self.inner.execute(statement).await
    }

    async fn batch(&self, batch: Batch) -> Result<(), StorageError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("batch rejected".to_string()));
        }
        self.inner.batch(batch).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.inner.close().await
    }
}
