//! Query Router
//!
//! Executes a Query AST against the DocumentStore:
//! 1. Plan: pick the most selective usable index
//! 2. Scan the index range (or the whole collection)
//! 3. Fetch documents and apply every condition
//! 4. Sort, skip and limit
//!
//! # Execution Pipeline
//!
//! ```text
//! Query → Plan → Index Scan / Full Scan → Fetch → Filter → Order → Page → Result
//! ```
//!
//! Index selection is deterministic: the smallest estimated candidate set
//! wins; ties prefer a unique index, then an equality scan, then the field
//! name in lexicographic order.

use crate::index::{IndexBounds, IndexManager};
use crate::query::ast::*;
use crate::query::error::{QueryError, QueryResult};
use crate::query::parser::parse_query;
use crate::storage::{
    Checkpoint, Document, DocumentStore, GpsTrack, Record, Stored, TimeRange, Voyage,
    VoyageDetails, CHECKPOINTS, GPS_TRACKS, VOYAGES,
};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Page size of `list_voyages` when none is given
pub const DEFAULT_PAGE_SIZE: usize = 100;

/// How the candidate documents are found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanType {
    /// Index scan over a single key
    IndexedEquality,
    /// Index scan over a key range
    IndexedRange,
    /// Every document of the collection
    FullScan,
}

impl ScanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanType::IndexedEquality => "indexed_equality",
            ScanType::IndexedRange => "indexed_range",
            ScanType::FullScan => "full_scan",
        }
    }
}

/// One usable index and its estimated candidate count
#[derive(Debug, Clone, PartialEq)]
pub struct IndexChoice {
    pub field: String,
    pub bounds: IndexBounds,
    pub unique: bool,
    pub estimate: usize,
}

impl IndexChoice {
    /// Selection order: fewer candidates, unique, equality, field name
    fn rank(&self) -> (usize, bool, bool, &str) {
        (
            self.estimate,
            !self.unique,
            !self.bounds.is_point(),
            self.field.as_str(),
        )
    }
}

/// Execution plan of a query
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub collection: String,
    pub scan: ScanType,
    /// Chosen index, `None` for a full scan
    pub index: Option<IndexChoice>,
    /// Every usable index that was considered, best first
    pub considered: Vec<IndexChoice>,
}

impl fmt::Display for QueryPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index {
            Some(choice) => write!(
                f,
                "{} on {}.{} {} (estimated {} candidates)",
                self.scan.as_str(),
                self.collection,
                choice.field,
                choice.bounds,
                choice.estimate
            )?,
            None => write!(f, "{} on {}", self.scan.as_str(), self.collection)?,
        }
        for other in self.considered.iter().skip(1) {
            write!(
                f,
                "\n  also considered {} {} (estimated {})",
                other.field, other.bounds, other.estimate
            )?;
        }
        Ok(())
    }
}

/// Non-fatal conditions reported alongside results
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryWarning {
    /// No index covers any condition; the collection was scanned in full
    NoIndexAvailable {
        collection: String,
        fields: Vec<String>,
    },
}

impl fmt::Display for QueryWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryWarning::NoIndexAvailable { collection, fields } => write!(
                f,
                "no index available on {} for fields [{}]; used full scan",
                collection,
                fields.join(", ")
            ),
        }
    }
}

/// Result of a query execution
#[derive(Debug, Clone)]
pub struct QueryOutcome {
    /// Matching documents
    pub documents: Vec<Document>,
    /// Plan that produced them
    pub plan: QueryPlan,
    /// Soft warnings
    pub warnings: Vec<QueryWarning>,
    /// Number of documents examined
    pub scanned: usize,
    /// Execution time in milliseconds
    pub execution_time_ms: u64,
}

impl QueryOutcome {
    /// Get the number of documents
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn used_full_scan(&self) -> bool {
        self.plan.scan == ScanType::FullScan
    }

    /// Decode every document into a typed record
    pub fn decode<R: Record>(&self) -> QueryResult<Vec<Stored<R>>> {
        self.documents
            .iter()
            .map(|doc| Stored::from_document(doc).map_err(QueryError::from))
            .collect()
    }
}

/// Query router
pub struct QueryRouter {
    /// Reference to the document store
    store: Arc<DocumentStore>,
}

impl QueryRouter {
    /// Create a new query router
    pub fn new(store: Arc<DocumentStore>) -> Self {
        Self { store }
    }

    /// Execute a query string (parses and executes)
    pub async fn execute_str(&self, query_str: &str) -> QueryResult<QueryOutcome> {
        let query = parse_query(query_str)?;
        self.execute(&query).await
    }

    /// Plan a query without running it
    pub async fn explain(&self, query: &Query) -> QueryResult<QueryPlan> {
        validate(query)?;
        let reader = self.store.reader(&query.collection).await?;
        Ok(plan(reader.indexes(), query))
    }

    /// Execute a parsed query
    pub async fn execute(&self, query: &Query) -> QueryResult<QueryOutcome> {
        let start = Instant::now();
        validate(query)?;

        let reader = self.store.reader(&query.collection).await?;
        let plan = plan(reader.indexes(), query);
        let mut warnings = Vec::new();

        // 1. Candidates from the chosen index, or everything
        let candidates: Vec<&Document> = match &plan.index {
            Some(choice) => reader
                .indexes()
                .lookup(&choice.field, &choice.bounds)
                .unwrap_or_default()
                .into_iter()
                .filter_map(|id| reader.get(id))
                .collect(),
            None => {
                if !query.conditions.is_empty() {
                    let warning = QueryWarning::NoIndexAvailable {
                        collection: query.collection.clone(),
                        fields: query
                            .conditions
                            .iter()
                            .map(|c| c.field().to_string())
                            .collect(),
                    };
                    tracing::warn!("{}: {}", query, warning);
                    warnings.push(warning);
                }
                reader.iter().collect()
            }
        };
        let scanned = candidates.len();

        // 2. Apply every condition
        let mut documents: Vec<Document> = candidates
            .into_iter()
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect();
        drop(reader);

        // 3. Order and page
        if let Some(order) = &query.order_by {
            order.sort(&mut documents);
        }
        let documents: Vec<Document> = documents
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        let execution_time_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(
            "{} → {} documents ({} scanned, {}) in {}ms",
            query,
            documents.len(),
            scanned,
            plan.scan.as_str(),
            execution_time_ms
        );

        Ok(QueryOutcome {
            documents,
            plan,
            warnings,
            scanned,
            execution_time_ms,
        })
    }

    // ==================== Convenience Lookups ====================

    /// Checkpoints of a voyage ordered by timestamp, optionally within a time range
    pub async fn checkpoints_for_voyage(
        &self,
        voyage_id: &str,
        range: Option<TimeRange>,
    ) -> QueryResult<Vec<Stored<Checkpoint>>> {
        let query = voyage_timeline(CHECKPOINTS, voyage_id, range);
        self.execute(&query).await?.decode()
    }

    /// GPS track of a voyage ordered by timestamp, optionally within a time range
    pub async fn tracks_for_voyage(
        &self,
        voyage_id: &str,
        range: Option<TimeRange>,
    ) -> QueryResult<Vec<Stored<GpsTrack>>> {
        let query = voyage_timeline(GPS_TRACKS, voyage_id, range);
        self.execute(&query).await?.decode()
    }

    /// Look up a voyage by its voyage id
    pub async fn voyage_by_voyage_id(&self, voyage_id: &str) -> QueryResult<Option<Stored<Voyage>>> {
        let query = Query::find(VOYAGES)
            .where_eq("voyage_id", voyage_id)
            .limit(1)
            .build();
        Ok(self.execute(&query).await?.decode()?.into_iter().next())
    }

    /// Voyages of a ship ordered by departure time
    pub async fn voyages_for_ship(&self, ship_id: &str) -> QueryResult<Vec<Stored<Voyage>>> {
        let query = Query::find(VOYAGES)
            .where_eq("ship_id", ship_id)
            .order_by("departure_time")
            .build();
        self.execute(&query).await?.decode()
    }

    /// One page of voyages, newest first. A `limit` of 0 uses the default page size.
    pub async fn list_voyages(&self, limit: usize, offset: usize) -> QueryResult<Vec<Stored<Voyage>>> {
        let limit = if limit == 0 { DEFAULT_PAGE_SIZE } else { limit };
        let query = Query::find(VOYAGES)
            .order_by_desc("created_at")
            .limit(limit)
            .offset(offset)
            .build();
        self.execute(&query).await?.decode()
    }

    /// A voyage together with its checkpoints and GPS track
    pub async fn voyage_details(&self, voyage_id: &str) -> QueryResult<Option<VoyageDetails>> {
        let Some(voyage) = self.voyage_by_voyage_id(voyage_id).await? else {
            return Ok(None);
        };

        let checkpoints = self.checkpoints_for_voyage(voyage_id, None).await?;
        let gps_tracks = self.tracks_for_voyage(voyage_id, None).await?;

        Ok(Some(VoyageDetails {
            voyage,
            checkpoints,
            gps_tracks,
        }))
    }
}

fn voyage_timeline(collection: &str, voyage_id: &str, range: Option<TimeRange>) -> Query {
    let mut builder = Query::find(collection).where_eq("voyage_id", voyage_id);
    if let Some(range) = range {
        builder = builder.time_range("timestamp", range);
    }
    builder.order_by("timestamp").build()
}

/// Reject conditions that can never be evaluated meaningfully
fn validate(query: &Query) -> QueryResult<()> {
    for condition in &query.conditions {
        if let Condition::Between { field, low, high } = condition {
            if low > high {
                return Err(QueryError::InvalidCondition(format!(
                    "{} BETWEEN {} AND {}: lower bound exceeds upper bound",
                    field, low, high
                )));
            }
        }
    }
    Ok(())
}

/// Choose the index for a query
pub fn plan(indexes: &IndexManager, query: &Query) -> QueryPlan {
    // Combine all conditions on the same indexed field into one range
    let mut ranges: BTreeMap<&str, IndexBounds> = BTreeMap::new();
    for condition in &query.conditions {
        let Some(bounds) = condition.bounds() else {
            continue;
        };
        if !indexes.has_index(condition.field()) {
            continue;
        }
        let range = ranges
            .entry(condition.field())
            .or_insert_with(IndexBounds::all);
        range.tighten_lower(bounds.lower);
        range.tighten_upper(bounds.upper);
    }

    let mut considered: Vec<IndexChoice> = ranges
        .into_iter()
        .filter_map(|(field, bounds)| {
            let index = indexes.index(field)?;
            Some(IndexChoice {
                field: field.to_string(),
                estimate: index.estimate(&bounds),
                unique: index.is_unique(),
                bounds,
            })
        })
        .collect();
    considered.sort_by(|a, b| a.rank().cmp(&b.rank()));

    let index = considered.first().cloned();
    let scan = match &index {
        Some(choice) if choice.bounds.is_point() => ScanType::IndexedEquality,
        Some(_) => ScanType::IndexedRange,
        None => ScanType::FullScan,
    };

    QueryPlan {
        collection: query.collection.clone(),
        scan,
        index,
        considered,
    }
}
