//! Logbook Query Engine
//!
//! Routes document lookups through the most selective secondary index:
//!
//! - **AST**: Query, Condition and OrderBy types with a builder
//! - **Parser**: Parse query strings into AST
//! - **Router**: Plan and execute queries against the document store
//!
//! # Query Language
//!
//! ```text
//! FIND collection
//! [WHERE field op value [AND ...]]
//! [ORDER BY field [ASC|DESC]]
//! [LIMIT n] [OFFSET n]
//! ```
//!
//! # Examples
//!
//! ## Using Query Builder
//!
//! ```rust,ignore
//! use logbook::query::{Query, QueryRouter};
//!
//! let query = Query::find("checkpoints")
//!     .where_eq("voyage_id", "V1")
//!     .where_between("timestamp", t0, t0 + 20)
//!     .order_by("timestamp")
//!     .build();
//!
//! let outcome = router.execute(&query).await?;
//! ```
//!
//! ## Using Query String
//!
//! ```rust,ignore
//! let outcome = router.execute_str(
//!     "FIND voyages WHERE ship_id = 'S1' ORDER BY departure_time DESC LIMIT 10"
//! ).await?;
//! ```

mod ast;
mod error;
mod parser;
mod router;

pub use ast::{Condition, Operator, OrderBy, Query, QueryBuilder};
pub use error::{QueryError, QueryResult};
pub use parser::parse_query;
pub use router::{
    plan, IndexChoice, QueryOutcome, QueryPlan, QueryRouter, QueryWarning, ScanType,
    DEFAULT_PAGE_SIZE,
};
