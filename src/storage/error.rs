//! Storage error types
//!
//! Defines all errors that can occur in the document store and its indexes.

use thiserror::Error;

/// Errors that can occur in the document store
#[derive(Error, Debug)]
pub enum StorageError {
    /// I/O operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Data corruption detected (checksum mismatch, oversized record, etc.)
    #[error("Corrupt data: {0}")]
    Corruption(String),

    /// A unique index already holds this value for another document
    #[error("Duplicate key in {collection}.{field}: {value}")]
    DuplicateKey {
        collection: String,
        field: String,
        value: String,
    },

    /// No document with this id exists in the collection
    #[error("Document not found: {collection}/{id}")]
    DocumentNotFound { collection: String, id: u64 },

    /// The collection was never created
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    /// The document body is not a JSON object or cannot be mapped to a record
    #[error("Invalid document: {0}")]
    InvalidDocument(String),

    /// Catalog (collection/index registry) failure
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Lock acquisition failed
    #[error("Lock error: {0}")]
    Lock(String),
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        StorageError::Catalog(err.to_string())
    }
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::DuplicateKey {
            collection: "voyages".to_string(),
            field: "voyage_id".to_string(),
            value: "\"V1\"".to_string(),
        };
        assert_eq!(err.to_string(), "Duplicate key in voyages.voyage_id: \"V1\"");

        let err = StorageError::UnknownCollection("ships".to_string());
        assert_eq!(err.to_string(), "Unknown collection: ships");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
    }
}
