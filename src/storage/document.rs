//! Documents as stored in a collection
//!
//! A [`Document`] is a JSON object plus the id the store assigned on insert.
//! Typed records (voyages, checkpoints, track points) map onto documents via
//! the [`Record`] trait.

use crate::storage::error::{StorageError, StorageResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Store-assigned document identifier.
///
/// Ids are handed out in increasing order per collection, so id order is
/// insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub u64);

impl DocumentId {
    pub const MIN: DocumentId = DocumentId(0);
    pub const MAX: DocumentId = DocumentId(u64::MAX);

    pub fn next(self) -> DocumentId {
        DocumentId(self.0 + 1)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// A stored JSON object
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocumentId,
    pub fields: Map<String, Value>,
}

impl Document {
    pub fn new(id: DocumentId, fields: Map<String, Value>) -> Self {
        Self { id, fields }
    }

    /// Parse a document body from its stored JSON bytes
    pub fn from_bytes(id: DocumentId, bytes: &[u8]) -> StorageResult<Self> {
        match serde_json::from_slice::<Value>(bytes)? {
            Value::Object(fields) => Ok(Self { id, fields }),
            other => Err(StorageError::InvalidDocument(format!(
                "expected JSON object, found {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Encode the body as JSON bytes.
    ///
    /// Object keys are kept sorted, so equal bodies always encode to equal bytes.
    pub fn to_bytes(&self) -> StorageResult<Vec<u8>> {
        Ok(serde_json::to_vec(&self.fields)?)
    }

    /// Get a field value, `None` when absent
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.field(name).and_then(Value::as_str)
    }

    pub fn i64_field(&self, name: &str) -> Option<i64> {
        self.field(name).and_then(Value::as_i64)
    }

    /// Decode into a typed record
    pub fn decode<R: Record>(&self) -> StorageResult<R> {
        R::from_fields(&self.fields)
    }
}

/// Convert any JSON value into a document body
pub fn into_fields(value: Value) -> StorageResult<Map<String, Value>> {
    match value {
        Value::Object(fields) => Ok(fields),
        other => Err(StorageError::InvalidDocument(format!(
            "expected JSON object, found {}",
            json_type_name(&other)
        ))),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// A typed record that lives in a fixed collection
pub trait Record: Serialize + DeserializeOwned {
    /// Collection this record type is stored in
    const COLLECTION: &'static str;

    fn to_fields(&self) -> StorageResult<Map<String, Value>> {
        into_fields(serde_json::to_value(self)?)
    }

    fn from_fields(fields: &Map<String, Value>) -> StorageResult<Self> {
        serde_json::from_value(Value::Object(fields.clone()))
            .map_err(|e| StorageError::InvalidDocument(format!("{}: {}", Self::COLLECTION, e)))
    }
}

/// A typed record together with its document id
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Stored<R> {
    pub id: DocumentId,
    #[serde(flatten)]
    pub record: R,
}

impl<R: Record> Stored<R> {
    pub fn from_document(doc: &Document) -> StorageResult<Self> {
        Ok(Self {
            id: doc.id,
            record: doc.decode()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_bytes_are_stable() {
        let fields = into_fields(json!({"b": 2, "a": 1.25, "nested": {"z": null, "y": [1, 2]}}))
            .unwrap();
        let doc = Document::new(DocumentId(7), fields);
        let bytes = doc.to_bytes().unwrap();

        let decoded = Document::from_bytes(DocumentId(7), &bytes).unwrap();
        assert_eq!(decoded, doc);
        assert_eq!(decoded.to_bytes().unwrap(), bytes);
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            into_fields(json!([1, 2, 3])),
            Err(StorageError::InvalidDocument(_))
        ));
        assert!(Document::from_bytes(DocumentId(1), b"42").is_err());
    }

    #[test]
    fn test_id_display() {
        assert_eq!(DocumentId(255).to_string(), "00000000000000ff");
        assert!(DocumentId(1) < DocumentId(1).next());
    }
}
