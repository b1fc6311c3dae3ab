//! Query Abstract Syntax Tree
//!
//! A query targets one collection and carries a conjunction of field
//! conditions plus optional ordering and paging.
//!
//! # Example Queries
//!
//! ```text
//! FIND checkpoints WHERE voyage_id = 'V1' AND timestamp BETWEEN 1000 AND 2000
//! FIND voyages WHERE ship_id = 'S1' ORDER BY departure_time DESC LIMIT 10
//! FIND gps_tracks WHERE timestamp >= now() - 24h
//! ```
//!
//! Values compare with [`IndexKey`] ordering, so a condition matches a
//! document exactly when an index scan over the same bounds would return it.

use crate::index::{IndexBounds, IndexKey};
use crate::storage::{Document, TimeRange};
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

/// A parsed query ready for execution
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Collection to read from
    pub collection: String,
    /// Conditions, all of which must hold
    pub conditions: Vec<Condition>,
    /// Optional sort
    pub order_by: Option<OrderBy>,
    /// Optional limit on results
    pub limit: Option<usize>,
    /// Number of leading results to skip
    pub offset: usize,
}

impl Query {
    /// Start building a query against a collection
    pub fn find(collection: impl Into<String>) -> QueryBuilder {
        QueryBuilder::new(collection)
    }

    /// Whether a document satisfies every condition
    pub fn matches(&self, doc: &Document) -> bool {
        self.conditions.iter().all(|c| c.matches(doc))
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FIND {}", self.collection)?;
        for (i, condition) in self.conditions.iter().enumerate() {
            let keyword = if i == 0 { "WHERE" } else { "AND" };
            write!(f, " {} {}", keyword, condition)?;
        }
        if let Some(order) = &self.order_by {
            write!(f, " ORDER BY {}", order)?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {}", limit)?;
        }
        if self.offset > 0 {
            write!(f, " OFFSET {}", self.offset)?;
        }
        Ok(())
    }
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    /// Equal to
    Eq,
    /// Not equal to
    Ne,
    /// Greater than
    Gt,
    /// Greater than or equal to
    Gte,
    /// Less than
    Lt,
    /// Less than or equal to
    Lte,
}

impl Operator {
    /// Parse from string
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "=" | "==" => Some(Self::Eq),
            "!=" | "<>" => Some(Self::Ne),
            ">" => Some(Self::Gt),
            ">=" => Some(Self::Gte),
            "<" => Some(Self::Lt),
            "<=" => Some(Self::Lte),
            _ => None,
        }
    }

    /// Apply to the ordering of a document value against the operand
    pub fn accepts(&self, ordering: Ordering) -> bool {
        match self {
            Self::Eq => ordering == Ordering::Equal,
            Self::Ne => ordering != Ordering::Equal,
            Self::Gt => ordering == Ordering::Greater,
            Self::Gte => ordering != Ordering::Less,
            Self::Lt => ordering == Ordering::Less,
            Self::Lte => ordering != Ordering::Greater,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Eq => write!(f, "="),
            Self::Ne => write!(f, "!="),
            Self::Gt => write!(f, ">"),
            Self::Gte => write!(f, ">="),
            Self::Lt => write!(f, "<"),
            Self::Lte => write!(f, "<="),
        }
    }
}

/// A single condition on one field
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// `field op value`
    Compare {
        field: String,
        op: Operator,
        value: IndexKey,
    },
    /// `field BETWEEN low AND high`, both ends inclusive
    Between {
        field: String,
        low: IndexKey,
        high: IndexKey,
    },
}

impl Condition {
    pub fn compare(field: impl Into<String>, op: Operator, value: impl Into<IndexKey>) -> Self {
        Self::Compare {
            field: field.into(),
            op,
            value: value.into(),
        }
    }

    pub fn eq(field: impl Into<String>, value: impl Into<IndexKey>) -> Self {
        Self::compare(field, Operator::Eq, value)
    }

    pub fn between(
        field: impl Into<String>,
        low: impl Into<IndexKey>,
        high: impl Into<IndexKey>,
    ) -> Self {
        Self::Between {
            field: field.into(),
            low: low.into(),
            high: high.into(),
        }
    }

    pub fn field(&self) -> &str {
        match self {
            Self::Compare { field, .. } | Self::Between { field, .. } => field,
        }
    }

    /// Key range an index scan would need, `None` if not expressible as one
    pub fn bounds(&self) -> Option<IndexBounds> {
        match self {
            Self::Between { low, high, .. } => Some(IndexBounds::between(low.clone(), high.clone())),
            Self::Compare { op, value, .. } => {
                let v = value.clone();
                let (lower, upper) = match op {
                    Operator::Eq => return Some(IndexBounds::eq(v)),
                    Operator::Ne => return None,
                    Operator::Gt => (Bound::Excluded(v), Bound::Unbounded),
                    Operator::Gte => (Bound::Included(v), Bound::Unbounded),
                    Operator::Lt => (Bound::Unbounded, Bound::Excluded(v)),
                    Operator::Lte => (Bound::Unbounded, Bound::Included(v)),
                };
                Some(IndexBounds { lower, upper })
            }
        }
    }

    /// Whether a document satisfies this condition.
    ///
    /// A missing field compares as `null`; array and object values never match.
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(key) = IndexKey::from_field(doc.field(self.field())) else {
            return false;
        };
        match self {
            Self::Compare { op, value, .. } => op.accepts(key.cmp(value)),
            Self::Between { low, high, .. } => &key >= low && &key <= high,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Compare { field, op, value } => write!(f, "{} {} {}", field, op, literal(value)),
            Self::Between { field, low, high } => {
                write!(f, "{} BETWEEN {} AND {}", field, literal(low), literal(high))
            }
        }
    }
}

/// Render a key in query syntax; quotes inside strings are doubled
fn literal(key: &IndexKey) -> String {
    match key {
        IndexKey::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

/// Sort specification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: false,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            descending: true,
        }
    }

    /// Stable sort; documents with equal keys keep their relative order
    pub fn sort(&self, docs: &mut [Document]) {
        docs.sort_by(|a, b| {
            let ka = IndexKey::from_field(a.field(&self.field));
            let kb = IndexKey::from_field(b.field(&self.field));
            let ordering = ka.cmp(&kb);
            if self.descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
    }
}

impl fmt::Display for OrderBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.field)?;
        if self.descending {
            write!(f, " DESC")?;
        }
        Ok(())
    }
}

/// Builder for constructing queries programmatically
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    collection: String,
    conditions: Vec<Condition>,
    order_by: Option<OrderBy>,
    limit: Option<usize>,
    offset: usize,
}

impl QueryBuilder {
    /// Create a new query builder for the given collection
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            conditions: Vec::new(),
            order_by: None,
            limit: None,
            offset: 0,
        }
    }

    /// Add a condition
    pub fn filter(mut self, condition: Condition) -> Self {
        self.conditions.push(condition);
        self
    }

    /// Add an equality condition
    pub fn where_eq(self, field: impl Into<String>, value: impl Into<IndexKey>) -> Self {
        self.filter(Condition::eq(field, value))
    }

    /// Add a comparison condition
    pub fn where_cmp(
        self,
        field: impl Into<String>,
        op: Operator,
        value: impl Into<IndexKey>,
    ) -> Self {
        self.filter(Condition::compare(field, op, value))
    }

    /// Add an inclusive range condition
    pub fn where_between(
        self,
        field: impl Into<String>,
        low: impl Into<IndexKey>,
        high: impl Into<IndexKey>,
    ) -> Self {
        self.filter(Condition::between(field, low, high))
    }

    /// Restrict a timestamp field to a time range
    pub fn time_range(self, field: impl Into<String>, range: TimeRange) -> Self {
        self.where_between(field, range.start, range.end)
    }

    /// Sort ascending by a field
    pub fn order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy::asc(field));
        self
    }

    /// Sort descending by a field
    pub fn order_by_desc(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(OrderBy::desc(field));
        self
    }

    /// Set a limit on results
    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    /// Skip leading results
    pub fn offset(mut self, n: usize) -> Self {
        self.offset = n;
        self
    }

    /// Build the query
    pub fn build(self) -> Query {
        Query {
            collection: self.collection,
            conditions: self.conditions,
            order_by: self.order_by,
            limit: self.limit,
            offset: self.offset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{into_fields, DocumentId};
    use serde_json::json;

    fn doc(id: u64, value: serde_json::Value) -> Document {
        Document::new(DocumentId(id), into_fields(value).unwrap())
    }

    #[test]
    fn test_query_builder_basic() {
        let query = Query::find("checkpoints")
            .where_eq("voyage_id", "V1")
            .where_between("timestamp", 1000, 2000)
            .order_by("timestamp")
            .limit(5)
            .build();

        assert_eq!(query.collection, "checkpoints");
        assert_eq!(query.conditions.len(), 2);
        assert_eq!(query.limit, Some(5));
        assert_eq!(
            query.to_string(),
            "FIND checkpoints WHERE voyage_id = 'V1' AND timestamp BETWEEN 1000 AND 2000 \
             ORDER BY timestamp LIMIT 5"
        );
    }

    #[test]
    fn test_condition_bounds() {
        let gt = Condition::compare("timestamp", Operator::Gt, 10);
        assert_eq!(
            gt.bounds(),
            Some(IndexBounds {
                lower: Bound::Excluded(IndexKey::Int(10)),
                upper: Bound::Unbounded,
            })
        );
        assert!(Condition::compare("ship_id", Operator::Ne, "S1")
            .bounds()
            .is_none());
    }

    #[test]
    fn test_condition_matches() {
        let d = doc(0, json!({"voyage_id": "V1", "timestamp": 1500, "tags": ["a"]}));

        assert!(Condition::eq("voyage_id", "V1").matches(&d));
        assert!(!Condition::eq("voyage_id", "V2").matches(&d));
        assert!(Condition::between("timestamp", 1000, 1500).matches(&d));
        assert!(!Condition::compare("timestamp", Operator::Gt, 1500).matches(&d));
        assert!(Condition::compare("timestamp", Operator::Ne, 1).matches(&d));

        // Missing fields compare as null
        assert!(Condition::eq("arrival_time", IndexKey::Null).matches(&d));
        // Arrays never match
        assert!(!Condition::compare("tags", Operator::Ne, 1).matches(&d));
    }

    #[test]
    fn test_order_by_is_stable() {
        let mut docs = vec![
            doc(0, json!({"t": 2})),
            doc(1, json!({"t": 1})),
            doc(2, json!({"t": 2})),
            doc(3, json!({})),
        ];

        OrderBy::asc("t").sort(&mut docs);
        let ids: Vec<u64> = docs.iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![3, 1, 0, 2]);

        OrderBy::desc("t").sort(&mut docs);
        let ids: Vec<u64> = docs.iter().map(|d| d.id.0).collect();
        assert_eq!(ids, vec![0, 2, 1, 3]);
    }

    #[test]
    fn test_operator_accepts() {
        assert!(Operator::Gte.accepts(Ordering::Equal));
        assert!(Operator::Gte.accepts(Ordering::Greater));
        assert!(!Operator::Lt.accepts(Ordering::Equal));
        assert_eq!(Operator::from_str("<>"), Some(Operator::Ne));
    }
}
