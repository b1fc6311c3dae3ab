//! Logbook Ingestion Path
//!
//! Validates incoming voyages, checkpoints and GPS track points and appends
//! them to the document store.
//!
//! # Write Pipeline
//!
//! ```text
//! payload → shape checks → lock voyage → load voyage → window checks → store
//! ```
//!
//! Every check runs before the first write, so a rejected request (single or
//! batch) leaves nothing behind. Writes touching the same voyage are
//! serialised by a per-voyage async mutex; different voyages proceed
//! independently.

pub mod validate;

use crate::index::{IndexBounds, IndexKey};
use crate::storage::{
    now_millis, Checkpoint, CollectionState, DocumentId, DocumentStore, GpsTrack, Location,
    Record, StorageError, StorageResult, Stored, Voyage, VoyageStatus, WeatherInfo, CHECKPOINTS,
    GPS_TRACKS, VOYAGES,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use uuid::Uuid;

/// Errors that can occur while ingesting telemetry
#[derive(Error, Debug)]
pub enum IngestError {
    /// The referenced voyage does not exist
    #[error("Voyage not found: {0}")]
    VoyageNotFound(String),

    /// Timestamp outside the voyage window, or arrival before departure
    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// Missing or malformed field
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Voyage state does not allow the transition
    #[error("Voyage {voyage_id} is {status}, not in progress")]
    VoyageNotInProgress {
        voyage_id: String,
        status: VoyageStatus,
    },

    /// Track point older than the voyage's latest one (rejecting mode only)
    #[error("Out-of-order track point for voyage {voyage_id}: {timestamp} precedes {last}")]
    OutOfOrder {
        voyage_id: String,
        timestamp: i64,
        last: i64,
    },

    /// A batch with no items
    #[error("Empty batch")]
    EmptyBatch,

    /// A batch above the configured size
    #[error("Batch of {size} items exceeds the maximum of {max}")]
    BatchTooLarge { size: usize, max: usize },

    /// Storage layer error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Ingestion settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Largest accepted batch
    #[serde(default = "default_max_batch_size")]
    pub max_batch_size: usize,

    /// Reject track points older than the voyage's latest one instead of
    /// accepting and flagging them
    #[serde(default)]
    pub reject_out_of_order_tracks: bool,
}

fn default_max_batch_size() -> usize {
    1000
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_batch_size: default_max_batch_size(),
            reject_out_of_order_tracks: false,
        }
    }
}

// ==================== Requests ====================

/// Request to start a voyage
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewVoyage {
    /// Generated (UUID v4) when absent or empty
    #[serde(default)]
    pub voyage_id: Option<String>,
    pub ship_id: String,
    pub ship_name: String,
    pub departure_port: String,
    /// Defaults to now
    #[serde(default)]
    pub departure_time: Option<i64>,
}

impl NewVoyage {
    pub fn new(
        ship_id: impl Into<String>,
        ship_name: impl Into<String>,
        departure_port: impl Into<String>,
    ) -> Self {
        Self {
            voyage_id: None,
            ship_id: ship_id.into(),
            ship_name: ship_name.into(),
            departure_port: departure_port.into(),
            departure_time: None,
        }
    }

    /// Builder: use a caller-chosen voyage id
    pub fn with_id(mut self, voyage_id: impl Into<String>) -> Self {
        self.voyage_id = Some(voyage_id.into());
        self
    }

    /// Builder: set the departure time
    pub fn departing_at(mut self, timestamp: i64) -> Self {
        self.departure_time = Some(timestamp);
        self
    }
}

/// Request to complete a voyage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Arrival {
    #[serde(default)]
    pub arrival_port: Option<String>,
    /// Defaults to now
    #[serde(default)]
    pub arrival_time: Option<i64>,
}

/// Checkpoint to record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewCheckpoint {
    pub voyage_id: String,
    pub location: Location,
    /// Defaults to now
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub weather: Option<WeatherInfo>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl NewCheckpoint {
    pub fn new(voyage_id: impl Into<String>, location: Location) -> Self {
        Self {
            voyage_id: voyage_id.into(),
            location,
            timestamp: None,
            description: None,
            weather: None,
            payload: None,
        }
    }

    /// Builder: set the timestamp
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builder: attach a description
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Builder: attach a free-form status payload
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    fn into_checkpoint(self, now: i64) -> Checkpoint {
        Checkpoint {
            voyage_id: self.voyage_id,
            location: self.location,
            timestamp: self.timestamp.unwrap_or(now),
            description: self.description,
            weather: self.weather,
            payload: self.payload,
            created_at: now,
        }
    }
}

/// GPS sample to record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTrackPoint {
    pub voyage_id: String,
    pub location: Location,
    #[serde(default)]
    pub speed: f64,
    #[serde(default)]
    pub heading: f64,
    #[serde(default)]
    pub altitude: Option<f64>,
    /// Defaults to now
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl NewTrackPoint {
    pub fn new(voyage_id: impl Into<String>, location: Location) -> Self {
        Self {
            voyage_id: voyage_id.into(),
            location,
            speed: 0.0,
            heading: 0.0,
            altitude: None,
            timestamp: None,
        }
    }

    /// Builder: set the timestamp
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    /// Builder: set speed (knots) and heading (degrees)
    pub fn moving(mut self, speed: f64, heading: f64) -> Self {
        self.speed = speed;
        self.heading = heading;
        self
    }

    fn into_track(self, now: i64) -> GpsTrack {
        GpsTrack {
            voyage_id: self.voyage_id,
            location: self.location,
            speed: self.speed,
            heading: self.heading,
            altitude: self.altitude,
            timestamp: self.timestamp.unwrap_or(now),
            created_at: now,
        }
    }
}

/// A stored track point and whether it arrived out of order
#[derive(Debug, Clone, Serialize)]
pub struct TrackReceipt {
    #[serde(flatten)]
    pub track: Stored<GpsTrack>,
    pub out_of_order: bool,
}

// ==================== Ingestor ====================

/// Per-voyage state guarded by the voyage lock
#[derive(Debug, Default)]
struct VoyageCursor {
    /// Latest GPS track timestamp, once loaded from the store
    last_track: Option<i64>,
    loaded: bool,
}

type VoyageLocks = Mutex<HashMap<String, Arc<AsyncMutex<VoyageCursor>>>>;

/// Held voyage lock. The last holder removes the voyage's table entry on drop.
struct VoyageGuard<'a> {
    voyage_id: String,
    table: &'a VoyageLocks,
    guard: OwnedMutexGuard<VoyageCursor>,
}

impl Deref for VoyageGuard<'_> {
    type Target = VoyageCursor;

    fn deref(&self) -> &VoyageCursor {
        &self.guard
    }
}

impl DerefMut for VoyageGuard<'_> {
    fn deref_mut(&mut self) -> &mut VoyageCursor {
        &mut self.guard
    }
}

impl Drop for VoyageGuard<'_> {
    fn drop(&mut self) {
        let Ok(mut table) = self.table.lock() else {
            return;
        };
        let lock = OwnedMutexGuard::mutex(&self.guard);
        // One reference in the table, one in this guard
        let idle = table
            .get(&self.voyage_id)
            .is_some_and(|entry| Arc::ptr_eq(entry, lock) && Arc::strong_count(entry) == 2);
        if idle {
            table.remove(&self.voyage_id);
        }
    }
}

/// Validating writer for voyage telemetry
pub struct Ingestor {
    store: Arc<DocumentStore>,
    config: IngestConfig,
    /// One lock per voyage id with a writer holding or waiting on it
    voyages: VoyageLocks,
}

impl Ingestor {
    pub fn new(store: Arc<DocumentStore>, config: IngestConfig) -> Self {
        Self {
            store,
            config,
            voyages: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    // ==================== Voyages ====================

    /// Start a voyage
    pub async fn depart_voyage(&self, request: NewVoyage) -> Result<Stored<Voyage>, IngestError> {
        validate::new_voyage(&request)?;

        let voyage_id = match request.voyage_id {
            Some(id) if !id.trim().is_empty() => id,
            _ => Uuid::new_v4().to_string(),
        };

        let now = now_millis();
        let voyage = Voyage {
            voyage_id,
            ship_id: request.ship_id,
            ship_name: request.ship_name,
            departure_port: request.departure_port,
            arrival_port: None,
            departure_time: request.departure_time.unwrap_or(now),
            arrival_time: None,
            status: VoyageStatus::InProgress,
            created_at: now,
            updated_at: now,
        };

        let _guard = self.lock_voyage(&voyage.voyage_id).await?;
        let id = self.store.put(VOYAGES, voyage.to_fields()?).await?;

        tracing::info!(
            "Voyage {} departed: ship {} from {}",
            voyage.voyage_id,
            voyage.ship_id,
            voyage.departure_port
        );
        Ok(Stored { id, record: voyage })
    }

    /// Complete an in-progress voyage
    pub async fn arrive_voyage(
        &self,
        voyage_id: &str,
        arrival: Arrival,
    ) -> Result<Stored<Voyage>, IngestError> {
        validate::voyage_id(voyage_id)?;
        let _guard = self.lock_voyage(voyage_id).await?;

        let Stored { id, record: mut voyage } = self.load_voyage(voyage_id).await?;
        ensure_in_progress(&voyage)?;

        let now = now_millis();
        let arrival_time = arrival.arrival_time.unwrap_or(now);
        let latest = self
            .latest_timestamp(CHECKPOINTS, voyage_id)
            .await?
            .max(self.latest_timestamp(GPS_TRACKS, voyage_id).await?);
        validate::arrival(&voyage, arrival_time, latest)?;

        voyage.arrival_time = Some(arrival_time);
        if arrival.arrival_port.is_some() {
            voyage.arrival_port = arrival.arrival_port;
        }
        voyage.status = VoyageStatus::Completed;
        voyage.updated_at = now;

        self.store.update(VOYAGES, id, voyage.to_fields()?).await?;

        tracing::info!("Voyage {} arrived at {}", voyage_id, arrival_time);
        Ok(Stored { id, record: voyage })
    }

    /// Cancel an in-progress voyage
    pub async fn cancel_voyage(&self, voyage_id: &str) -> Result<Stored<Voyage>, IngestError> {
        validate::voyage_id(voyage_id)?;
        let _guard = self.lock_voyage(voyage_id).await?;

        let Stored { id, record: mut voyage } = self.load_voyage(voyage_id).await?;
        ensure_in_progress(&voyage)?;

        voyage.status = VoyageStatus::Cancelled;
        voyage.updated_at = now_millis();
        self.store.update(VOYAGES, id, voyage.to_fields()?).await?;

        tracing::info!("Voyage {} cancelled", voyage_id);
        Ok(Stored { id, record: voyage })
    }

    // ==================== Checkpoints ====================

    /// Record one checkpoint
    pub async fn record_checkpoint(
        &self,
        request: NewCheckpoint,
    ) -> Result<Stored<Checkpoint>, IngestError> {
        let mut stored = self.write_checkpoints(vec![request]).await?;
        stored.pop().ok_or(IngestError::EmptyBatch)
    }

    /// Record several checkpoints atomically
    pub async fn record_checkpoints(
        &self,
        batch: Vec<NewCheckpoint>,
    ) -> Result<Vec<Stored<Checkpoint>>, IngestError> {
        self.check_batch_size(batch.len())?;
        self.write_checkpoints(batch).await
    }

    async fn write_checkpoints(
        &self,
        batch: Vec<NewCheckpoint>,
    ) -> Result<Vec<Stored<Checkpoint>>, IngestError> {
        for request in &batch {
            validate::checkpoint(request)?;
        }

        let voyage_ids: BTreeSet<String> = batch.iter().map(|c| c.voyage_id.clone()).collect();
        let _guards = self.lock_voyages(&voyage_ids).await?;
        let voyages = self.load_voyages(&voyage_ids).await?;

        let now = now_millis();
        let records: Vec<Checkpoint> = batch.into_iter().map(|c| c.into_checkpoint(now)).collect();
        for record in &records {
            validate::within_window(voyage_of(&voyages, &record.voyage_id)?, record.timestamp, now)?;
        }

        let fields = records
            .iter()
            .map(Record::to_fields)
            .collect::<StorageResult<Vec<_>>>()?;
        let ids = self.store.put_batch(CHECKPOINTS, fields).await?;

        tracing::debug!("Recorded {} checkpoints", ids.len());
        Ok(ids
            .into_iter()
            .zip(records)
            .map(|(id, record)| Stored { id, record })
            .collect())
    }

    // ==================== GPS Tracks ====================

    /// Record one GPS track point
    pub async fn record_track_point(&self, request: NewTrackPoint) -> Result<TrackReceipt, IngestError> {
        let mut receipts = self.write_tracks(vec![request]).await?;
        receipts.pop().ok_or(IngestError::EmptyBatch)
    }

    /// Record several GPS track points atomically
    pub async fn record_track_points(
        &self,
        batch: Vec<NewTrackPoint>,
    ) -> Result<Vec<TrackReceipt>, IngestError> {
        self.check_batch_size(batch.len())?;
        self.write_tracks(batch).await
    }

    async fn write_tracks(&self, batch: Vec<NewTrackPoint>) -> Result<Vec<TrackReceipt>, IngestError> {
        for request in &batch {
            validate::track_point(request)?;
        }

        let voyage_ids: BTreeSet<String> = batch.iter().map(|p| p.voyage_id.clone()).collect();
        let mut guards = self.lock_voyages(&voyage_ids).await?;
        let voyages = self.load_voyages(&voyage_ids).await?;

        for (voyage_id, cursor) in guards.iter_mut() {
            if !cursor.loaded {
                cursor.last_track = self.latest_timestamp(GPS_TRACKS, voyage_id).await?;
                cursor.loaded = true;
            }
        }
        let mut last: HashMap<String, Option<i64>> = guards
            .iter()
            .map(|(voyage_id, cursor)| (voyage_id.clone(), cursor.last_track))
            .collect();

        let now = now_millis();
        let mut accepted = Vec::with_capacity(batch.len());
        for request in batch {
            let track = request.into_track(now);
            validate::within_window(voyage_of(&voyages, &track.voyage_id)?, track.timestamp, now)?;

            let previous = last.get(&track.voyage_id).copied().flatten();
            let out_of_order = match previous {
                Some(prev) if track.timestamp < prev => {
                    if self.config.reject_out_of_order_tracks {
                        return Err(IngestError::OutOfOrder {
                            voyage_id: track.voyage_id,
                            timestamp: track.timestamp,
                            last: prev,
                        });
                    }
                    tracing::warn!(
                        "Out-of-order track point for voyage {}: {} precedes {}",
                        track.voyage_id,
                        track.timestamp,
                        prev
                    );
                    true
                }
                _ => false,
            };

            last.insert(track.voyage_id.clone(), previous.max(Some(track.timestamp)));
            accepted.push((track, out_of_order));
        }

        let fields = accepted
            .iter()
            .map(|(track, _)| track.to_fields())
            .collect::<StorageResult<Vec<_>>>()?;
        let ids = self.store.put_batch(GPS_TRACKS, fields).await?;

        for (voyage_id, cursor) in guards.iter_mut() {
            if let Some(latest) = last.get(voyage_id) {
                cursor.last_track = *latest;
            }
        }

        tracing::debug!("Recorded {} track points", ids.len());
        Ok(ids
            .into_iter()
            .zip(accepted)
            .map(|(id, (record, out_of_order))| TrackReceipt {
                track: Stored { id, record },
                out_of_order,
            })
            .collect())
    }

    // ==================== Helpers ====================

    fn check_batch_size(&self, size: usize) -> Result<(), IngestError> {
        if size == 0 {
            return Err(IngestError::EmptyBatch);
        }
        if size > self.config.max_batch_size {
            return Err(IngestError::BatchTooLarge {
                size,
                max: self.config.max_batch_size,
            });
        }
        Ok(())
    }

    async fn lock_voyage(&self, voyage_id: &str) -> Result<VoyageGuard<'_>, IngestError> {
        let lock = {
            let mut voyages = self
                .voyages
                .lock()
                .map_err(|e| StorageError::Lock(format!("Failed to acquire voyage lock table: {}", e)))?;
            Arc::clone(voyages.entry(voyage_id.to_string()).or_default())
        };
        Ok(VoyageGuard {
            voyage_id: voyage_id.to_string(),
            table: &self.voyages,
            guard: lock.lock_owned().await,
        })
    }

    /// Lock several voyages, always in id order
    async fn lock_voyages(
        &self,
        voyage_ids: &BTreeSet<String>,
    ) -> Result<BTreeMap<String, VoyageGuard<'_>>, IngestError> {
        let mut guards = BTreeMap::new();
        for voyage_id in voyage_ids {
            guards.insert(voyage_id.clone(), self.lock_voyage(voyage_id).await?);
        }
        Ok(guards)
    }

    async fn load_voyage(&self, voyage_id: &str) -> Result<Stored<Voyage>, IngestError> {
        let reader = self.store.reader(VOYAGES).await?;
        let doc = ids_for_voyage(&reader, voyage_id)
            .into_iter()
            .find_map(|id| reader.get(id))
            .ok_or_else(|| IngestError::VoyageNotFound(voyage_id.to_string()))?;
        Ok(Stored::from_document(doc)?)
    }

    async fn load_voyages(
        &self,
        voyage_ids: &BTreeSet<String>,
    ) -> Result<HashMap<String, Voyage>, IngestError> {
        let mut voyages = HashMap::new();
        for voyage_id in voyage_ids {
            let stored = self.load_voyage(voyage_id).await?;
            voyages.insert(voyage_id.clone(), stored.record);
        }
        Ok(voyages)
    }

    /// Latest `timestamp` recorded for a voyage in a telemetry collection
    async fn latest_timestamp(
        &self,
        collection: &str,
        voyage_id: &str,
    ) -> Result<Option<i64>, IngestError> {
        let reader = self.store.reader(collection).await?;
        Ok(ids_for_voyage(&reader, voyage_id)
            .into_iter()
            .filter_map(|id| reader.get(id))
            .filter_map(|doc| doc.i64_field("timestamp"))
            .max())
    }
}

/// Ids of documents belonging to a voyage, via the voyage_id index when present
fn ids_for_voyage(state: &CollectionState, voyage_id: &str) -> Vec<DocumentId> {
    let bounds = IndexBounds::eq(IndexKey::from(voyage_id));
    match state.indexes().lookup("voyage_id", &bounds) {
        Some(ids) => ids,
        None => state
            .iter()
            .filter(|doc| doc.str_field("voyage_id") == Some(voyage_id))
            .map(|doc| doc.id)
            .collect(),
    }
}

fn voyage_of<'a>(voyages: &'a HashMap<String, Voyage>, voyage_id: &str) -> Result<&'a Voyage, IngestError> {
    voyages
        .get(voyage_id)
        .ok_or_else(|| IngestError::VoyageNotFound(voyage_id.to_string()))
}

fn ensure_in_progress(voyage: &Voyage) -> Result<(), IngestError> {
    if !voyage.is_in_progress() {
        return Err(IngestError::VoyageNotInProgress {
            voyage_id: voyage.voyage_id.clone(),
            status: voyage.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;
    use crate::storage::StorageConfig;
    use serde_json::json;
    use tempfile::tempdir;

    const HOUR: i64 = 3_600_000;

    async fn create_test_ingestor(config: IngestConfig) -> (Arc<Ingestor>, Arc<DocumentStore>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = Arc::new(DocumentStore::open(StorageConfig::new(dir.path())).await.unwrap());
        store.ensure_schema(&Schema::sailing()).await.unwrap();
        let ingestor = Arc::new(Ingestor::new(Arc::clone(&store), config));
        (ingestor, store, dir)
    }

    async fn depart(ingestor: &Ingestor, voyage_id: &str, departure: i64) -> Stored<Voyage> {
        ingestor
            .depart_voyage(
                NewVoyage::new("S1", "Albatross", "Kiel")
                    .with_id(voyage_id)
                    .departing_at(departure),
            )
            .await
            .unwrap()
    }

    fn here() -> Location {
        Location::new(54.32, 10.12)
    }

    async fn count(store: &DocumentStore, collection: &str) -> usize {
        store.scan(collection, |_| true).await.unwrap().len()
    }

    #[tokio::test]
    async fn test_depart_generates_voyage_id() {
        let (ingestor, _store, _dir) = create_test_ingestor(IngestConfig::default()).await;

        let voyage = ingestor
            .depart_voyage(NewVoyage::new("S1", "Albatross", "Kiel"))
            .await
            .unwrap();
        assert!(Uuid::parse_str(&voyage.record.voyage_id).is_ok());
        assert_eq!(voyage.record.status, VoyageStatus::InProgress);
        assert!(voyage.record.arrival_time.is_none());

        let err = ingestor
            .depart_voyage(NewVoyage::new("", "Albatross", "Kiel"))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::InvalidPayload(_)));
    }

    #[tokio::test]
    async fn test_duplicate_voyage_id() {
        let (ingestor, _store, _dir) = create_test_ingestor(IngestConfig::default()).await;
        depart(&ingestor, "V1", now_millis() - HOUR).await;

        let err = ingestor
            .depart_voyage(NewVoyage::new("S2", "Petrel", "Aarhus").with_id("V1"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Storage(StorageError::DuplicateKey { .. })
        ));
    }

    #[tokio::test]
    async fn test_track_for_unknown_voyage() {
        let (ingestor, store, _dir) = create_test_ingestor(IngestConfig::default()).await;

        let err = ingestor
            .record_track_point(NewTrackPoint::new("ghost", here()))
            .await
            .unwrap_err();
        assert!(matches!(err, IngestError::VoyageNotFound(ref id) if id == "ghost"));
        assert_eq!(count(&store, GPS_TRACKS).await, 0);
    }

    #[tokio::test]
    async fn test_checkpoint_window() {
        let (ingestor, store, _dir) = create_test_ingestor(IngestConfig::default()).await;
        let t0 = now_millis() - HOUR;
        depart(&ingestor, "V1", t0).await;

        let stored = ingestor
            .record_checkpoint(
                NewCheckpoint::new("V1", here())
                    .at(t0 + 10)
                    .payload(json!({"status": "under sail"})),
            )
            .await
            .unwrap();
        assert_eq!(stored.record.timestamp, t0 + 10);

        let before = ingestor
            .record_checkpoint(NewCheckpoint::new("V1", here()).at(t0 - 1))
            .await
            .unwrap_err();
        assert!(matches!(before, IngestError::InvalidTimestamp(_)));

        let future = ingestor
            .record_checkpoint(NewCheckpoint::new("V1", here()).at(now_millis() + HOUR))
            .await
            .unwrap_err();
        assert!(matches!(future, IngestError::InvalidTimestamp(_)));

        // Default timestamp is now, which is inside the open window
        assert!(ingestor
            .record_checkpoint(NewCheckpoint::new("V1", here()))
            .await
            .is_ok());

        assert_eq!(count(&store, CHECKPOINTS).await, 2);
    }

    #[tokio::test]
    async fn test_arrival_rules() {
        let (ingestor, _store, _dir) = create_test_ingestor(IngestConfig::default()).await;
        let t0 = now_millis() - HOUR;
        depart(&ingestor, "V1", t0).await;
        ingestor
            .record_track_point(NewTrackPoint::new("V1", here()).at(t0 + 500))
            .await
            .unwrap();

        let early = Arrival {
            arrival_port: Some("Aarhus".to_string()),
            arrival_time: Some(t0 - 1),
        };
        assert!(matches!(
            ingestor.arrive_voyage("V1", early).await,
            Err(IngestError::InvalidTimestamp(_))
        ));

        let before_telemetry = Arrival {
            arrival_port: None,
            arrival_time: Some(t0 + 499),
        };
        assert!(matches!(
            ingestor.arrive_voyage("V1", before_telemetry).await,
            Err(IngestError::InvalidTimestamp(_))
        ));

        let arrived = ingestor
            .arrive_voyage(
                "V1",
                Arrival {
                    arrival_port: Some("Aarhus".to_string()),
                    arrival_time: Some(t0 + 1000),
                },
            )
            .await
            .unwrap();
        assert_eq!(arrived.record.status, VoyageStatus::Completed);
        assert_eq!(arrived.record.arrival_time, Some(t0 + 1000));
        assert_eq!(arrived.record.arrival_port.as_deref(), Some("Aarhus"));

        // Window is now closed at arrival
        let late = ingestor
            .record_checkpoint(NewCheckpoint::new("V1", here()).at(t0 + 1001))
            .await
            .unwrap_err();
        assert!(matches!(late, IngestError::InvalidTimestamp(_)));

        let again = ingestor.arrive_voyage("V1", Arrival::default()).await;
        assert!(matches!(again, Err(IngestError::VoyageNotInProgress { .. })));
        assert!(matches!(
            ingestor.cancel_voyage("V1").await,
            Err(IngestError::VoyageNotInProgress { .. })
        ));
    }

    #[tokio::test]
    async fn test_cancel_voyage() {
        let (ingestor, _store, _dir) = create_test_ingestor(IngestConfig::default()).await;
        depart(&ingestor, "V1", now_millis() - HOUR).await;

        let cancelled = ingestor.cancel_voyage("V1").await.unwrap();
        assert_eq!(cancelled.record.status, VoyageStatus::Cancelled);
        assert!(matches!(
            ingestor.cancel_voyage("missing").await,
            Err(IngestError::VoyageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_out_of_order_tracks_flagged() {
        let (ingestor, store, _dir) = create_test_ingestor(IngestConfig::default()).await;
        let t0 = now_millis() - HOUR;
        depart(&ingestor, "V1", t0).await;

        let first = ingestor
            .record_track_point(NewTrackPoint::new("V1", here()).at(t0 + 200))
            .await
            .unwrap();
        assert!(!first.out_of_order);

        let late = ingestor
            .record_track_point(NewTrackPoint::new("V1", here()).at(t0 + 100))
            .await
            .unwrap();
        assert!(late.out_of_order);

        let same = ingestor
            .record_track_point(NewTrackPoint::new("V1", here()).at(t0 + 200))
            .await
            .unwrap();
        assert!(!same.out_of_order);

        assert_eq!(count(&store, GPS_TRACKS).await, 3);
    }

    #[tokio::test]
    async fn test_out_of_order_tracks_rejected() {
        let config = IngestConfig {
            reject_out_of_order_tracks: true,
            ..Default::default()
        };
        let (ingestor, store, _dir) = create_test_ingestor(config).await;
        let t0 = now_millis() - HOUR;
        depart(&ingestor, "V1", t0).await;

        let batch = vec![
            NewTrackPoint::new("V1", here()).at(t0 + 10),
            NewTrackPoint::new("V1", here()).at(t0 + 30),
            NewTrackPoint::new("V1", here()).at(t0 + 20),
        ];
        let err = ingestor.record_track_points(batch).await.unwrap_err();
        assert!(matches!(err, IngestError::OutOfOrder { last, .. } if last == t0 + 30));
        assert_eq!(count(&store, GPS_TRACKS).await, 0);
    }

    #[tokio::test]
    async fn test_batches_are_all_or_nothing() {
        let config = IngestConfig {
            max_batch_size: 3,
            ..Default::default()
        };
        let (ingestor, store, _dir) = create_test_ingestor(config).await;
        let t0 = now_millis() - HOUR;
        depart(&ingestor, "V1", t0).await;
        depart(&ingestor, "V2", t0).await;

        // One bad item rejects the whole batch
        let batch = vec![
            NewCheckpoint::new("V1", here()).at(t0 + 1),
            NewCheckpoint::new("V2", here()).at(t0 + 2),
            NewCheckpoint::new("ghost", here()).at(t0 + 3),
        ];
        assert!(matches!(
            ingestor.record_checkpoints(batch).await,
            Err(IngestError::VoyageNotFound(_))
        ));
        assert_eq!(count(&store, CHECKPOINTS).await, 0);

        assert!(matches!(
            ingestor.record_checkpoints(Vec::new()).await,
            Err(IngestError::EmptyBatch)
        ));

        let too_many = (0..4)
            .map(|i| NewTrackPoint::new("V1", here()).at(t0 + i))
            .collect();
        assert!(matches!(
            ingestor.record_track_points(too_many).await,
            Err(IngestError::BatchTooLarge { size: 4, max: 3 })
        ));

        let batch = vec![
            NewCheckpoint::new("V1", here()).at(t0 + 1),
            NewCheckpoint::new("V2", here()).at(t0 + 2),
        ];
        let stored = ingestor.record_checkpoints(batch).await.unwrap();
        assert_eq!(stored.len(), 2);
        assert!(stored[0].id < stored[1].id);
        assert_eq!(count(&store, CHECKPOINTS).await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_writers_same_voyage() {
        let (ingestor, store, _dir) = create_test_ingestor(IngestConfig::default()).await;
        let t0 = now_millis() - HOUR;
        depart(&ingestor, "V1", t0).await;
        depart(&ingestor, "V2", t0).await;

        let mut handles = Vec::new();
        for i in 0..20 {
            let ingestor = Arc::clone(&ingestor);
            let voyage_id = if i % 2 == 0 { "V1" } else { "V2" };
            handles.push(tokio::spawn(async move {
                ingestor
                    .record_track_point(NewTrackPoint::new(voyage_id, here()).at(t0 + i))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(count(&store, GPS_TRACKS).await, 20);
    }

    #[tokio::test]
    async fn test_voyage_lock_table_is_pruned() {
        let (ingestor, _store, _dir) = create_test_ingestor(IngestConfig::default()).await;
        let t0 = now_millis() - HOUR;

        for i in 0..50 {
            let err = ingestor
                .record_track_point(NewTrackPoint::new(format!("GHOST-{}", i), here()).at(t0))
                .await
                .unwrap_err();
            assert!(matches!(err, IngestError::VoyageNotFound(_)));
        }
        assert!(ingestor.voyages.lock().unwrap().is_empty());

        depart(&ingestor, "V1", t0).await;
        let mut handles = Vec::new();
        for i in 0..10 {
            let ingestor = Arc::clone(&ingestor);
            handles.push(tokio::spawn(async move {
                ingestor
                    .record_track_point(NewTrackPoint::new("V1", here()).at(t0 + i))
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert!(ingestor.voyages.lock().unwrap().is_empty());

        // The cursor is reloaded from the store after pruning
        let receipt = ingestor
            .record_track_point(NewTrackPoint::new("V1", here()).at(t0))
            .await
            .unwrap();
        assert!(receipt.out_of_order);
    }
}
