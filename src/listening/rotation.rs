//! Replacement of a record whose value may be part of its own key.
//!
//! A rank row is keyed by the total it ranks, so a changed total cannot be
//! written in place: the row under the old total has to go in the same batch
//! that writes the row under the new one.

use crate::wide_column::{Delete, Mutation, TableSchema, Upsert, Value};

#[derive(Debug, Clone)]
pub struct RotatingRecord {
    table: &'static TableSchema,
    key: Vec<(&'static str, Value)>,
    value_column: &'static str,
}

impl RotatingRecord {
    pub fn new(table: &'static TableSchema, value_column: &'static str) -> Self {
        Self {
            table,
            key: Vec::new(),
            value_column,
        }
    }

    /// Adds one of the key columns that stay fixed across rotations.
    pub fn key(mut self, column: &'static str, value: impl Into<Value>) -> Self {
        self.key.push((column, value.into()));
        self
    }

    fn value_is_keyed(&self) -> bool {
        self.table.is_key_column(self.value_column)
    }

    /// Mutations that move the record from `old` (if any) to `new`.
    ///
    /// A delete is only emitted when the old row lives under a different key.
    /// Deleting and inserting the same key in one batch could drop the insert
    /// on engines that order same-key writes by timestamp.
    pub fn rotate(&self, old: Option<Value>, new: Value) -> Vec<Mutation> {
        let mut mutations = Vec::with_capacity(2);
        if let Some(old) = old {
            if self.value_is_keyed() && old != new {
                let mut delete = Delete::on(self.table);
                for (column, value) in &self.key {
                    delete = delete.key(*column, value.clone());
                }
                mutations.push(delete.key(self.value_column, old).into());
            }
        }

        let mut upsert = Upsert::on(self.table);
        for (column, value) in &self.key {
            upsert = upsert.set(*column, value.clone());
        }
        mutations.push(upsert.set(self.value_column, new).into());
        mutations
    }
}
