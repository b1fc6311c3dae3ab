//! # Logbook
//!
//! Voyage telemetry store - an embedded document store for sailing voyages,
//! their checkpoints and their GPS tracks.
//!
//! ## Features
//!
//! - **Durable storage**: Append-only, checksummed log per collection
//! - **Secondary indexes**: Ordered, optionally unique, maintained on every write
//! - **Query routing**: Each query goes through its most selective index
//! - **Safe ingestion**: Voyage existence and time windows checked before writing
//!
//! ## Modules
//!
//! - [`storage`]: Document store, collection logs and domain records
//! - [`index`]: Field indexes and the persisted catalog
//! - [`schema`]: Collection and index declarations, idempotent initialisation
//! - [`query`]: Query language parser and router
//! - [`ingest`]: Validated writes of voyages, checkpoints and track points
//! - [`import`]: CSV track import
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use logbook::ingest::{IngestConfig, Ingestor, NewCheckpoint, NewVoyage};
//! use logbook::query::QueryRouter;
//! use logbook::storage::*;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = Arc::new(DocumentStore::open(StorageConfig::default()).await?);
//!     logbook::schema::initialize(&store).await?;
//!
//!     let ingestor = Ingestor::new(Arc::clone(&store), IngestConfig::default());
//!     let voyage = ingestor
//!         .depart_voyage(NewVoyage::new("S1", "Albatross", "Kiel"))
//!         .await?;
//!     ingestor
//!         .record_checkpoint(NewCheckpoint::new(
//!             voyage.record.voyage_id.clone(),
//!             Location::new(54.32, 10.12),
//!         ))
//!         .await?;
//!
//!     let router = QueryRouter::new(Arc::clone(&store));
//!     let checkpoints = router
//!         .checkpoints_for_voyage(&voyage.record.voyage_id, Some(TimeRange::last_hours(24)))
//!         .await?;
//!     println!("Found {} checkpoints", checkpoints.len());
//!
//!     store.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod import;
pub mod index;
pub mod ingest;
pub mod query;
pub mod schema;
pub mod storage;

// Re-export top-level types for convenience
pub use storage::{
    Checkpoint, Document, DocumentId, DocumentStore, GpsTrack, Location, StorageConfig,
    StorageError, StorageResult, StorageStats, TimeRange, Voyage, VoyageDetails, VoyageStatus,
};

pub use index::{IndexBounds, IndexKey, IndexManager, IndexSpec, IndexStats};

pub use schema::{CollectionSpec, InitReport, Schema};

pub use query::{Query, QueryError, QueryOutcome, QueryPlan, QueryRouter, QueryWarning};

pub use ingest::{IngestConfig, IngestError, Ingestor};

pub use import::{ImportError, TrackImporter};

pub use config::{Config, ConfigError, LoggingConfig};
