//! Field Index - ordered set of (key, document id) pairs
//!
//! One per indexed field. Scans return ids ordered by key, and for equal
//! keys by document id, which is insertion order.
//!
//! # Performance
//! - Insert/remove: O(log n)
//! - Range scan: O(log n + k) where k = results

use crate::index::{IndexBounds, IndexKey, IndexSpec, IndexStats};
use crate::storage::DocumentId;
use std::collections::BTreeSet;
use std::ops::Bound;

/// B-tree index over one document field
#[derive(Debug, Clone)]
pub struct FieldIndex {
    spec: IndexSpec,
    entries: BTreeSet<(IndexKey, DocumentId)>,
}

impl FieldIndex {
    pub fn new(spec: IndexSpec) -> Self {
        Self {
            spec,
            entries: BTreeSet::new(),
        }
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    pub fn field(&self) -> &str {
        &self.spec.field
    }

    pub fn is_unique(&self) -> bool {
        self.spec.unique
    }

    pub fn insert(&mut self, key: IndexKey, id: DocumentId) {
        self.entries.insert((key, id));
    }

    pub fn remove(&mut self, key: &IndexKey, id: DocumentId) -> bool {
        self.entries.remove(&(key.clone(), id))
    }

    /// First id holding this key other than `exclude`
    pub fn conflicting(&self, key: &IndexKey, exclude: Option<DocumentId>) -> Option<DocumentId> {
        self.iter_range(&IndexBounds::eq(key.clone()))
            .map(|(_, id)| *id)
            .find(|id| Some(*id) != exclude)
    }

    /// Ids whose key lies within `bounds`, ordered by key then insertion
    pub fn scan(&self, bounds: &IndexBounds) -> Vec<DocumentId> {
        self.iter_range(bounds).map(|(_, id)| *id).collect()
    }

    /// Number of ids a scan with `bounds` would return
    pub fn estimate(&self, bounds: &IndexBounds) -> usize {
        self.iter_range(bounds).count()
    }

    fn iter_range<'a>(
        &'a self,
        bounds: &IndexBounds,
    ) -> Box<dyn Iterator<Item = &'a (IndexKey, DocumentId)> + 'a> {
        if bounds.is_empty() {
            return Box::new(std::iter::empty());
        }

        // Map key bounds onto (key, id) pairs so every id of a boundary key
        // is included or excluded together.
        let lower = match &bounds.lower {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(k) => Bound::Included((k.clone(), DocumentId::MIN)),
            Bound::Excluded(k) => Bound::Excluded((k.clone(), DocumentId::MAX)),
        };
        let upper = match &bounds.upper {
            Bound::Unbounded => Bound::Unbounded,
            Bound::Included(k) => Bound::Included((k.clone(), DocumentId::MAX)),
            Bound::Excluded(k) => Bound::Excluded((k.clone(), DocumentId::MIN)),
        };

        Box::new(self.entries.range((lower, upper)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        let mut distinct_keys = 0;
        let mut last: Option<&IndexKey> = None;
        for (key, _) in &self.entries {
            if last != Some(key) {
                distinct_keys += 1;
                last = Some(key);
            }
        }

        IndexStats {
            field: self.spec.field.clone(),
            unique: self.spec.unique,
            entries: self.entries.len(),
            distinct_keys,
        }
    }
}
