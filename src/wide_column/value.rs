use super::engine::StorageError;
use super::schema::DATE_FORMAT;
use bigdecimal::BigDecimal;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// A single cell value as handed to and returned from a storage engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Text(String),
    Uuid(Uuid),
    Decimal(BigDecimal),
    Date(NaiveDate),
    Null,
}

impl Value {
    /// Stable textual form used for storage and for key comparison.
    ///
    /// Decimals are normalized so that numerically equal values (3.5, 3.50)
    /// always encode to the same key.
    pub fn encode(&self) -> Option<String> {
        match self {
            Value::Text(s) => Some(s.clone()),
            Value::Uuid(u) => Some(u.hyphenated().to_string()),
            Value::Decimal(d) => Some(canonical_decimal(d)),
            Value::Date(d) => Some(d.format(DATE_FORMAT).to_string()),
            Value::Null => None,
        }
    }
}

fn canonical_decimal(value: &BigDecimal) -> String {
    let normalized = value.normalized();
    let (_, scale) = normalized.as_bigint_and_exponent();
    if scale < 0 {
        normalized.with_scale(0).to_string()
    } else {
        normalized.to_string()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encode() {
            Some(s) => write!(f, "{}", s),
            None => write!(f, "null"),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Uuid> for Value {
    fn from(u: Uuid) -> Self {
        Value::Uuid(u)
    }
}

impl From<BigDecimal> for Value {
    fn from(d: BigDecimal) -> Self {
        Value::Decimal(d)
    }
}

impl From<NaiveDate> for Value {
    fn from(d: NaiveDate) -> Self {
        Value::Date(d)
    }
}

/// One row returned by a select, keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: BTreeMap<&'static str, Value>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, column: &'static str, value: Value) {
        self.columns.insert(column, value);
    }

    /// Returns the cell, treating a stored null like an absent column.
    pub fn get(&self, column: &str) -> Option<&Value> {
        match self.columns.get(column) {
            Some(Value::Null) | None => None,
            Some(value) => Some(value),
        }
    }

    fn required(&self, column: &'static str) -> Result<&Value, StorageError> {
        self.get(column).ok_or(StorageError::Decode {
            column,
            reason: "missing value".to_string(),
        })
    }

    fn wrong_type(column: &'static str, expected: &str, got: &Value) -> StorageError {
        StorageError::Decode {
            column,
            reason: format!("expected {}, got {:?}", expected, got),
        }
    }

    pub fn text(&self, column: &'static str) -> Result<String, StorageError> {
        match self.required(column)? {
            Value::Text(s) => Ok(s.clone()),
            other => Err(Self::wrong_type(column, "text", other)),
        }
    }

    pub fn uuid(&self, column: &'static str) -> Result<Uuid, StorageError> {
        match self.required(column)? {
            Value::Uuid(u) => Ok(*u),
            other => Err(Self::wrong_type(column, "uuid", other)),
        }
    }

    pub fn decimal(&self, column: &'static str) -> Result<BigDecimal, StorageError> {
        match self.required(column)? {
            Value::Decimal(d) => Ok(d.clone()),
            other => Err(Self::wrong_type(column, "decimal", other)),
        }
    }

    pub fn date(&self, column: &'static str) -> Result<NaiveDate, StorageError> {
        match self.required(column)? {
            Value::Date(d) => Ok(*d),
            other => Err(Self::wrong_type(column, "date", other)),
        }
    }
}

/// Decoding of a typed record from a row of a known table.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> Result<Self, StorageError>;
}
