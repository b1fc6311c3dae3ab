//! Index Manager - Coordinates the field indexes of one collection
//!
//! Every store mutation goes through here before it is acknowledged:
//!
//! ```text
//! put(doc)     → check_unique(doc) → insert(doc)
//! update(doc)  → check_unique(new, excluding doc.id) → replace(old, new)
//! ```
//!
//! Unique checks run before anything is mutated, so a rejected write leaves
//! both the store and the indexes untouched.

use crate::index::{FieldIndex, IndexBounds, IndexKey, IndexSpec, IndexStats};
use crate::storage::{Document, DocumentId, StorageError, StorageResult};

/// All secondary indexes of a single collection
#[derive(Debug, Clone)]
pub struct IndexManager {
    collection: String,
    indexes: Vec<FieldIndex>,
}

impl IndexManager {
    /// Create a manager with no indexes
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            indexes: Vec::new(),
        }
    }

    // ==================== Index Definition ====================

    /// Create an index over existing documents.
    ///
    /// Returns `false` without changes when an index on the field already
    /// exists with the same uniqueness. Fails with `DuplicateKey` when a
    /// unique index would be violated by the existing documents, and with
    /// `Catalog` when the field is already indexed with different uniqueness.
    pub fn ensure_index<'a>(
        &mut self,
        spec: &IndexSpec,
        documents: impl IntoIterator<Item = &'a Document>,
    ) -> StorageResult<bool> {
        if let Some(existing) = self.index(&spec.field) {
            if existing.is_unique() != spec.unique {
                return Err(StorageError::Catalog(format!(
                    "index {}.{} already exists with unique={}",
                    self.collection,
                    spec.field,
                    existing.is_unique()
                )));
            }
            return Ok(false);
        }

        let mut index = FieldIndex::new(spec.clone());
        for doc in documents {
            let Some(key) = IndexKey::from_field(doc.field(&spec.field)) else {
                continue;
            };
            if spec.unique {
                if index.conflicting(&key, Some(doc.id)).is_some() {
                    return Err(self.duplicate(&spec.field, &key));
                }
            }
            index.insert(key, doc.id);
        }

        tracing::debug!(
            "Built index {} over {} documents",
            spec,
            index.len()
        );
        self.indexes.push(index);
        Ok(true)
    }

    // ==================== Mutation Hooks ====================

    /// Fail with `DuplicateKey` if `doc` would collide in any unique index.
    ///
    /// `exclude` is the document being replaced, if any.
    pub fn check_unique(&self, doc: &Document, exclude: Option<DocumentId>) -> StorageResult<()> {
        for index in self.indexes.iter().filter(|i| i.is_unique()) {
            if let Some(key) = IndexKey::from_field(doc.field(index.field())) {
                if index.conflicting(&key, exclude).is_some() {
                    return Err(self.duplicate(index.field(), &key));
                }
            }
        }
        Ok(())
    }

    /// Fail with `DuplicateKey` if the documents collide with the index or
    /// with each other in any unique index
    pub fn check_unique_batch(&self, docs: &[Document]) -> StorageResult<()> {
        for index in self.indexes.iter().filter(|i| i.is_unique()) {
            let mut seen = std::collections::BTreeSet::new();
            for doc in docs {
                if let Some(key) = IndexKey::from_field(doc.field(index.field())) {
                    if index.conflicting(&key, None).is_some() || !seen.insert(key.clone()) {
                        return Err(self.duplicate(index.field(), &key));
                    }
                }
            }
        }
        Ok(())
    }

    /// Add a document to every index
    pub fn insert(&mut self, doc: &Document) {
        for index in &mut self.indexes {
            if let Some(key) = IndexKey::from_field(doc.field(index.field())) {
                index.insert(key, doc.id);
            }
        }
    }

    /// Remove a document from every index
    pub fn remove(&mut self, doc: &Document) {
        for index in &mut self.indexes {
            if let Some(key) = IndexKey::from_field(doc.field(index.field())) {
                index.remove(&key, doc.id);
            }
        }
    }

    /// Move a document's entries from its old version to its new one
    pub fn replace(&mut self, old: &Document, new: &Document) {
        self.remove(old);
        self.insert(new);
    }

    // ==================== Query Methods ====================

    pub fn index(&self, field: &str) -> Option<&FieldIndex> {
        self.indexes.iter().find(|i| i.field() == field)
    }

    pub fn has_index(&self, field: &str) -> bool {
        self.index(field).is_some()
    }

    /// Ordered ids for a key range, `None` when the field is not indexed
    pub fn lookup(&self, field: &str, bounds: &IndexBounds) -> Option<Vec<DocumentId>> {
        self.index(field).map(|index| index.scan(bounds))
    }

    /// Candidate count for a key range, `None` when the field is not indexed
    pub fn estimate(&self, field: &str, bounds: &IndexBounds) -> Option<usize> {
        self.index(field).map(|index| index.estimate(bounds))
    }

    pub fn specs(&self) -> Vec<IndexSpec> {
        self.indexes.iter().map(|i| i.spec().clone()).collect()
    }

    // ==================== Stats Methods ====================

    pub fn stats(&self) -> Vec<IndexStats> {
        self.indexes.iter().map(FieldIndex::stats).collect()
    }

    fn duplicate(&self, field: &str, key: &IndexKey) -> StorageError {
        StorageError::DuplicateKey {
            collection: self.collection.clone(),
            field: field.to_string(),
            value: key.to_string(),
        }
    }
}
