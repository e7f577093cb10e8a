use super::engine::StorageError;
use super::value::Value;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::str::FromStr;
use uuid::Uuid;

/// Added to every keyspace version when stamped into the database, so that a
/// database never provisioned by us (user_version = 0) is told apart from v0.
pub const BASE_DB_VERSION: usize = 99999;

pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Text,
    Uuid,
    Decimal,
    Date,
}

impl ColumnType {
    /// Parses the stored textual representation of a cell.
    pub fn decode(&self, column: &'static str, raw: &str) -> Result<Value, StorageError> {
        let decode_err = |reason: String| StorageError::Decode { column, reason };
        match self {
            ColumnType::Text => Ok(Value::Text(raw.to_string())),
            ColumnType::Uuid => Uuid::parse_str(raw)
                .map(Value::Uuid)
                .map_err(|e| decode_err(e.to_string())),
            ColumnType::Decimal => BigDecimal::from_str(raw)
                .map(Value::Decimal)
                .map_err(|e| decode_err(e.to_string())),
            ColumnType::Date => NaiveDate::parse_from_str(raw, DATE_FORMAT)
                .map(Value::Date)
                .map_err(|e| decode_err(e.to_string())),
        }
    }

    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (_, Value::Null)
                | (ColumnType::Text, Value::Text(_))
                | (ColumnType::Uuid, Value::Uuid(_))
                | (ColumnType::Decimal, Value::Decimal(_))
                | (ColumnType::Date, Value::Date(_))
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusteringOrder {
    Asc,
    Desc,
}

impl ClusteringOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            ClusteringOrder::Asc => "ASC",
            ClusteringOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug)]
pub struct Column {
    pub name: &'static str,
    pub column_type: ColumnType,
}

#[derive(Debug)]
pub struct ClusteringColumn {
    pub name: &'static str,
    pub order: ClusteringOrder,
}

/// A partitioned table: rows are grouped by `partition_key` and, inside a
/// partition, kept sorted by `clustering` in the declared direction.
#[derive(Debug)]
pub struct TableSchema {
    pub name: &'static str,
    pub columns: &'static [Column],
    pub partition_key: &'static [&'static str],
    pub clustering: &'static [ClusteringColumn],
}

impl TableSchema {
    pub fn column(&self, name: &str) -> Option<&'static Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn is_partition_column(&self, name: &str) -> bool {
        self.partition_key.contains(&name)
    }

    pub fn is_key_column(&self, name: &str) -> bool {
        self.is_partition_column(name) || self.clustering.iter().any(|c| c.name == name)
    }

    /// Partition key followed by clustering columns.
    pub fn primary_key(&self) -> Vec<&'static str> {
        self.partition_key
            .iter()
            .copied()
            .chain(self.clustering.iter().map(|c| c.name))
            .collect()
    }

    pub fn clustering_index_name(&self) -> String {
        format!("idx_{}_clustering", self.name)
    }

    /// Checks that the declaration itself is coherent: every key column is a
    /// declared column and the table has a partition key.
    pub fn check_declaration(&self) -> Result<(), StorageError> {
        if self.partition_key.is_empty() {
            return Err(StorageError::InvalidStatement(format!(
                "Table {} has no partition key",
                self.name
            )));
        }
        for key_column in self.primary_key() {
            if self.column(key_column).is_none() {
                return Err(StorageError::InvalidStatement(format!(
                    "Table {} declares key column {} which is not a column",
                    self.name, key_column
                )));
            }
        }
        Ok(())
    }

    /// Compares the declaration with what the engine reports for an already
    /// existing table: `(column name, is part of primary key)` in table order.
    pub fn validate_existing(&self, actual: &[(String, bool)]) -> Result<(), StorageError> {
        let mismatch = |reason: String| StorageError::SchemaMismatch {
            table: self.name,
            reason,
        };

        if actual.len() != self.columns.len() {
            return Err(mismatch(format!(
                "has {} columns, expected {}. Found column names: {}, expected: {}",
                actual.len(),
                self.columns.len(),
                actual
                    .iter()
                    .map(|(name, _)| name.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
                self.columns
                    .iter()
                    .map(|c| c.name)
                    .collect::<Vec<_>>()
                    .join(", ")
            )));
        }

        for ((actual_name, actual_is_key), expected) in actual.iter().zip(self.columns.iter()) {
            if actual_name != expected.name {
                return Err(mismatch(format!(
                    "column name mismatch: expected {}, got {}",
                    expected.name, actual_name
                )));
            }
            let expected_is_key = self.is_key_column(expected.name);
            if *actual_is_key != expected_is_key {
                return Err(mismatch(format!(
                    "column {} primary key mismatch: expected {}, got {}",
                    expected.name, expected_is_key, actual_is_key
                )));
            }
        }
        Ok(())
    }
}

/// A namespace of tables provisioned together and stamped with a version.
#[derive(Debug)]
pub struct Keyspace {
    pub name: &'static str,
    pub version: usize,
    pub tables: &'static [&'static TableSchema],
}
