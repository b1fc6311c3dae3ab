//! Logbook Index Structures
//!
//! Secondary indexes over document fields:
//!
//! - **FieldIndex**: ordered `(key, document id)` set for one field
//! - **IndexManager**: all field indexes of one collection, kept in step
//!   with every store mutation
//! - **Catalog**: SQLite-backed record of created collections and indexes
//!
//! # Architecture
//!
//! ```text
//! Query: "checkpoints of V1 between t0 and t0+20"
//!        ↓
//! voyage_id index: Eq("V1")           → 12 candidates
//! timestamp index: [t0, t0+20]        → 3 candidates   ← most selective
//!        ↓
//! Fetch 3 documents, apply remaining conditions → Results
//! ```

mod catalog;
mod field_index;
mod manager;

pub use catalog::Catalog;
pub use field_index::FieldIndex;
pub use manager::IndexManager;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

/// Declaration of one secondary index
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IndexSpec {
    pub collection: String,
    pub field: String,
    #[serde(default)]
    pub unique: bool,
}

impl IndexSpec {
    pub fn new(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            field: field.into(),
            unique: false,
        }
    }

    pub fn unique(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            unique: true,
            ..Self::new(collection, field)
        }
    }
}

impl fmt::Display for IndexSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.collection, self.field)?;
        if self.unique {
            write!(f, " (unique)")?;
        }
        Ok(())
    }
}

/// An indexable field value.
///
/// Ordering: Null < Bool < numbers < String. Integers and floats compare
/// numerically; integral floats are normalised to `Int` so the two never
/// tie. Arrays and objects are not indexable.
#[derive(Debug, Clone)]
pub enum IndexKey {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl IndexKey {
    /// Build a key from a JSON value; `None` for arrays and objects
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(IndexKey::Null),
            Value::Bool(b) => Some(IndexKey::Bool(*b)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(IndexKey::Int(i))
                } else {
                    n.as_f64().map(IndexKey::from_f64)
                }
            }
            Value::String(s) => Some(IndexKey::String(s.clone())),
            Value::Array(_) | Value::Object(_) => None,
        }
    }

    /// Key for a possibly-missing field; missing indexes as `Null`
    pub fn from_field(value: Option<&Value>) -> Option<Self> {
        match value {
            None => Some(IndexKey::Null),
            Some(v) => Self::from_json(v),
        }
    }

    pub fn from_f64(f: f64) -> Self {
        if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
            IndexKey::Int(f as i64)
        } else {
            IndexKey::Float(f)
        }
    }

    fn rank(&self) -> u8 {
        match self {
            IndexKey::Null => 0,
            IndexKey::Bool(_) => 1,
            IndexKey::Int(_) | IndexKey::Float(_) => 2,
            IndexKey::String(_) => 3,
        }
    }
}

impl From<&str> for IndexKey {
    fn from(s: &str) -> Self {
        IndexKey::String(s.to_string())
    }
}

impl From<String> for IndexKey {
    fn from(s: String) -> Self {
        IndexKey::String(s)
    }
}

impl From<i64> for IndexKey {
    fn from(i: i64) -> Self {
        IndexKey::Int(i)
    }
}

impl From<bool> for IndexKey {
    fn from(b: bool) -> Self {
        IndexKey::Bool(b)
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        use IndexKey::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Int(a), Int(b)) => a.cmp(b),
            (Float(a), Float(b)) => a.total_cmp(b),
            (Int(a), Float(b)) => cmp_int_float(*a, *b),
            (Float(a), Int(b)) => cmp_int_float(*b, *a).reverse(),
            (String(a), String(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

/// Exact comparison of an integer with a float, consistent with
/// `f64::total_cmp` for NaN and signed zero
fn cmp_int_float(i: i64, f: f64) -> Ordering {
    // 2^63, the first float above every i64
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;

    if f.is_nan() {
        return if f.is_sign_negative() {
            Ordering::Greater
        } else {
            Ordering::Less
        };
    }
    if f >= LIMIT {
        return Ordering::Less;
    }
    if f < -LIMIT {
        return Ordering::Greater;
    }

    let whole = f.trunc();
    match i.cmp(&(whole as i64)) {
        Ordering::Equal => {
            let frac = f - whole;
            if frac > 0.0 {
                Ordering::Less
            } else if frac < 0.0 || (f == 0.0 && f.is_sign_negative()) {
                Ordering::Greater
            } else {
                Ordering::Equal
            }
        }
        ord => ord,
    }
}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl fmt::Display for IndexKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKey::Null => write!(f, "null"),
            IndexKey::Bool(b) => write!(f, "{}", b),
            IndexKey::Int(i) => write!(f, "{}", i),
            IndexKey::Float(x) => write!(f, "{}", x),
            IndexKey::String(s) => write!(f, "{:?}", s),
        }
    }
}

/// Key range for an index scan
#[derive(Debug, Clone, PartialEq)]
pub struct IndexBounds {
    pub lower: Bound<IndexKey>,
    pub upper: Bound<IndexKey>,
}

impl IndexBounds {
    pub fn eq(key: IndexKey) -> Self {
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    pub fn between(start: IndexKey, end: IndexKey) -> Self {
        Self {
            lower: Bound::Included(start),
            upper: Bound::Included(end),
        }
    }

    /// Both ends included and equal
    pub fn is_point(&self) -> bool {
        matches!((&self.lower, &self.upper), (Bound::Included(a), Bound::Included(b)) if a == b)
    }

    /// Narrow the lower bound, keeping the tighter of the two
    pub fn tighten_lower(&mut self, bound: Bound<IndexKey>) {
        let tighter = match (&self.lower, &bound) {
            (Bound::Unbounded, _) => true,
            (_, Bound::Unbounded) => false,
            (Bound::Included(a), Bound::Included(b)) => b > a,
            (Bound::Included(a), Bound::Excluded(b)) => b >= a,
            (Bound::Excluded(a), Bound::Included(b)) => b > a,
            (Bound::Excluded(a), Bound::Excluded(b)) => b > a,
        };
        if tighter {
            self.lower = bound;
        }
    }

    /// Narrow the upper bound, keeping the tighter of the two
    pub fn tighten_upper(&mut self, bound: Bound<IndexKey>) {
        let tighter = match (&self.upper, &bound) {
            (Bound::Unbounded, _) => true,
            (_, Bound::Unbounded) => false,
            (Bound::Included(a), Bound::Included(b)) => b < a,
            (Bound::Included(a), Bound::Excluded(b)) => b <= a,
            (Bound::Excluded(a), Bound::Included(b)) => b < a,
            (Bound::Excluded(a), Bound::Excluded(b)) => b < a,
        };
        if tighter {
            self.upper = bound;
        }
    }

    /// Whether no key can satisfy both bounds
    pub fn is_empty(&self) -> bool {
        match (&self.lower, &self.upper) {
            (Bound::Included(a), Bound::Included(b)) => a > b,
            (Bound::Included(a), Bound::Excluded(b))
            | (Bound::Excluded(a), Bound::Included(b))
            | (Bound::Excluded(a), Bound::Excluded(b)) => a >= b,
            _ => false,
        }
    }

    pub fn contains(&self, key: &IndexKey) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(a) => key >= a,
            Bound::Excluded(a) => key > a,
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(b) => key <= b,
            Bound::Excluded(b) => key < b,
        };
        above && below
    }
}

impl fmt::Display for IndexBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_point() {
            if let Bound::Included(k) = &self.lower {
                return write!(f, "= {}", k);
            }
        }
        match &self.lower {
            Bound::Unbounded => write!(f, "(-inf")?,
            Bound::Included(k) => write!(f, "[{}", k)?,
            Bound::Excluded(k) => write!(f, "({}", k)?,
        }
        match &self.upper {
            Bound::Unbounded => write!(f, ", +inf)"),
            Bound::Included(k) => write!(f, ", {}]", k),
            Bound::Excluded(k) => write!(f, ", {})", k),
        }
    }
}

/// Statistics about one index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub field: String,
    pub unique: bool,
    /// Number of indexed documents
    pub entries: usize,
    /// Number of distinct keys
    pub distinct_keys: usize,
}
