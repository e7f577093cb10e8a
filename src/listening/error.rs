use crate::wide_column::StorageError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ListeningError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Invalid {field}: {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
}

impl ListeningError {
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        ListeningError::Validation {
            field,
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        ListeningError::NotFound {
            kind,
            id: id.to_string(),
        }
    }
}
