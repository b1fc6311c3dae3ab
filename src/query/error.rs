//! Query error types
//!
//! Defines all error conditions that can occur during query parsing and execution.

use crate::storage::StorageError;
use thiserror::Error;

/// Errors that can occur during query operations
#[derive(Error, Debug)]
pub enum QueryError {
    /// Query parsing failed
    #[error("Parse error: {0}")]
    Parse(String),

    /// Referenced collection does not exist
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// Condition cannot be evaluated (e.g. empty range)
    #[error("Invalid condition: {0}")]
    InvalidCondition(String),

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(StorageError),
}

impl From<StorageError> for QueryError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::UnknownCollection(name) => QueryError::UnknownCollection(name),
            other => QueryError::Storage(other),
        }
    }
}

/// Result type for query operations
pub type QueryResult<T> = Result<T, QueryError>;
