//! Logbook Storage Engine
//!
//! This module provides the durable document store:
//!
//! - **types**: Voyage telemetry records (Voyage, Checkpoint, GpsTrack, TimeRange)
//! - **document**: JSON documents, ids and the typed `Record` mapping
//! - **log**: CRC-framed append-only collection logs
//! - **engine**: Document store orchestrating logs, documents and indexes
//! - **error**: Error types
//!
//! # Architecture
//!
//! ```text
//! Write Path:
//!   Document → Unique checks → Collection log (fsync) → Documents + Indexes
//!
//! Read Path:
//!   Id / Index scan → Documents → Filter → Results
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use logbook::schema::Schema;
//! use logbook::storage::{DocumentStore, Record, StorageConfig, Voyage, VoyageStatus};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = DocumentStore::open(StorageConfig::new("./data")).await?;
//!     store.ensure_schema(&Schema::sailing()).await?;
//!
//!     let voyage = Voyage {
//!         voyage_id: "V1".into(),
//!         ship_id: "S1".into(),
//!         ship_name: "Albatross".into(),
//!         departure_port: "Kiel".into(),
//!         arrival_port: None,
//!         departure_time: 1_700_000_000_000,
//!         arrival_time: None,
//!         status: VoyageStatus::InProgress,
//!         created_at: 1_700_000_000_000,
//!         updated_at: 1_700_000_000_000,
//!     };
//!     let id = store.put(Voyage::COLLECTION, voyage.to_fields()?).await?;
//!     let doc = store.get(Voyage::COLLECTION, id).await?;
//!
//!     store.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod document;
pub mod engine;
pub mod error;
pub mod log;
pub mod types;

// Re-export commonly used types
pub use document::{into_fields, Document, DocumentId, Record, Stored};
pub use engine::{
    CollectionReader, CollectionState, CollectionStats, DocumentStore, StorageConfig, StorageStats,
};
pub use error::{StorageError, StorageResult};
pub use log::{CollectionLog, LogEntry, LogRecord, SyncMode};
pub use types::{
    now_millis, Checkpoint, GpsTrack, Location, TimeRange, Voyage, VoyageDetails, VoyageStatus,
    WeatherInfo, CHECKPOINTS, GPS_TRACKS, VOYAGES,
};
