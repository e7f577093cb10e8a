//! Statements understood by a [`StorageEngine`](super::StorageEngine).
//!
//! Statements are plain values describing what to read or write. Engines
//! validate them against the table declaration before running them.

use super::engine::StorageError;
use super::schema::TableSchema;
use super::value::Value;
use std::collections::BTreeSet;

/// Equality restrictions on the full partition key and an optional
/// clustering-key prefix. No restriction at all means a full scan.
#[derive(Debug, Clone)]
pub struct Select {
    pub table: &'static TableSchema,
    pub restrictions: Vec<(&'static str, Value)>,
    pub limit: Option<usize>,
}

impl Select {
    pub fn on(table: &'static TableSchema) -> Self {
        Self {
            table,
            restrictions: Vec::new(),
            limit: None,
        }
    }

    pub fn eq(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.restrictions.push((column, value.into()));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        let table = self.table;
        for (column, _) in &self.restrictions {
            if table.column(column).is_none() {
                return Err(invalid(table, format!("unknown column {}", column)));
            }
        }
        if self.restrictions.is_empty() {
            return Ok(());
        }

        let restricted: Vec<&str> = self.restrictions.iter().map(|(c, _)| *c).collect();
        for partition_column in table.partition_key {
            if !restricted.contains(partition_column) {
                return Err(invalid(
                    table,
                    format!("partition key column {} is not restricted", partition_column),
                ));
            }
        }

        // Clustering restrictions must form a prefix of the clustering key.
        let mut prefix_open = true;
        for clustering in table.clustering {
            let is_restricted = restricted.contains(&clustering.name);
            if is_restricted && !prefix_open {
                return Err(invalid(
                    table,
                    format!(
                        "clustering column {} restricted without its preceding columns",
                        clustering.name
                    ),
                ));
            }
            prefix_open = prefix_open && is_restricted;
        }

        for column in &restricted {
            if !table.is_key_column(column) {
                return Err(invalid(
                    table,
                    format!("cannot restrict non-key column {}", column),
                ));
            }
        }
        Ok(())
    }
}

/// Insert-or-overwrite of the given columns on a primary key.
#[derive(Debug, Clone)]
pub struct Upsert {
    pub table: &'static TableSchema,
    pub values: Vec<(&'static str, Value)>,
}

impl Upsert {
    pub fn on(table: &'static TableSchema) -> Self {
        Self {
            table,
            values: Vec::new(),
        }
    }

    pub fn set(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.values.push((column, value.into()));
        self
    }
}

/// Removal of exactly one row, addressed by its full primary key.
#[derive(Debug, Clone)]
pub struct Delete {
    pub table: &'static TableSchema,
    pub key: Vec<(&'static str, Value)>,
}

impl Delete {
    pub fn on(table: &'static TableSchema) -> Self {
        Self {
            table,
            key: Vec::new(),
        }
    }

    pub fn key(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.key.push((column, value.into()));
        self
    }
}

#[derive(Debug, Clone)]
pub enum Mutation {
    Upsert(Upsert),
    Delete(Delete),
}

impl Mutation {
    pub fn table(&self) -> &'static TableSchema {
        match self {
            Mutation::Upsert(u) => u.table,
            Mutation::Delete(d) => d.table,
        }
    }

    fn cells(&self) -> &[(&'static str, Value)] {
        match self {
            Mutation::Upsert(u) => &u.values,
            Mutation::Delete(d) => &d.key,
        }
    }

    pub fn value_of(&self, column: &str) -> Option<&Value> {
        self.cells()
            .iter()
            .find(|(c, _)| *c == column)
            .map(|(_, v)| v)
    }

    pub fn is_delete(&self) -> bool {
        matches!(self, Mutation::Delete(_))
    }

    /// The partition this mutation lands in.
    pub fn partition(&self) -> PartitionRef {
        let table = self.table();
        PartitionRef {
            table: table.name,
            key: table
                .partition_key
                .iter()
                .map(|column| {
                    self.value_of(column)
                        .and_then(Value::encode)
                        .unwrap_or_default()
                })
                .collect(),
        }
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        let table = self.table();
        for (column, value) in self.cells() {
            let declared = table
                .column(column)
                .ok_or_else(|| invalid(table, format!("unknown column {}", column)))?;
            if !declared.column_type.accepts(value) {
                return Err(invalid(
                    table,
                    format!("value {:?} does not fit column {}", value, column),
                ));
            }
        }
        for key_column in table.primary_key() {
            match self.value_of(key_column) {
                Some(Value::Null) | None => {
                    return Err(invalid(
                        table,
                        format!("primary key column {} is missing", key_column),
                    ))
                }
                Some(_) => {}
            }
        }
        if let Mutation::Delete(delete) = self {
            if delete.key.len() != table.primary_key().len() {
                return Err(invalid(
                    table,
                    "delete must address exactly the primary key".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl From<Upsert> for Mutation {
    fn from(u: Upsert) -> Self {
        Mutation::Upsert(u)
    }
}

impl From<Delete> for Mutation {
    fn from(d: Delete) -> Self {
        Mutation::Delete(d)
    }
}

#[derive(Debug, Clone)]
pub enum Statement {
    Select(Select),
    Mutation(Mutation),
}

impl From<Select> for Statement {
    fn from(s: Select) -> Self {
        Statement::Select(s)
    }
}

impl From<Upsert> for Statement {
    fn from(u: Upsert) -> Self {
        Statement::Mutation(u.into())
    }
}

impl From<Delete> for Statement {
    fn from(d: Delete) -> Self {
        Statement::Mutation(d.into())
    }
}

/// Identifies one partition of one table.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PartitionRef {
    pub table: &'static str,
    pub key: Vec<String>,
}

/// An ordered group of mutations submitted as one unit.
///
/// Atomicity holds within the engine's partition-group boundary; across
/// groups it is best effort. [`Batch::partition_groups`] lists what a batch
/// touches so callers and logs can reason about that boundary.
#[derive(Debug, Clone, Default)]
pub struct Batch {
    mutations: Vec<Mutation>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, mutation: impl Into<Mutation>) {
        self.mutations.push(mutation.into());
    }

    pub fn extend(&mut self, mutations: impl IntoIterator<Item = Mutation>) {
        self.mutations.extend(mutations);
    }

    pub fn len(&self) -> usize {
        self.mutations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }

    pub fn mutations(&self) -> &[Mutation] {
        &self.mutations
    }

    pub fn into_mutations(self) -> Vec<Mutation> {
        self.mutations
    }

    pub fn partition_groups(&self) -> BTreeSet<PartitionRef> {
        self.mutations.iter().map(Mutation::partition).collect()
    }

    pub fn validate(&self) -> Result<(), StorageError> {
        self.mutations.iter().try_for_each(Mutation::validate)
    }
}

fn invalid(table: &TableSchema, reason: String) -> StorageError {
    StorageError::InvalidStatement(format!("{}: {}", table.name, reason))
}
