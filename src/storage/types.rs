//! Core data types for voyage telemetry
//!
//! - `Voyage`: one ship journey, bounded by departure and arrival
//! - `Checkpoint`: a discrete status event during a voyage
//! - `GpsTrack`: a single GPS sample during a voyage
//! - `TimeRange`: a closed time interval for queries
//!
//! All timestamps are Unix milliseconds, UTC.

use crate::storage::document::{Record, Stored};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Collection names
pub const VOYAGES: &str = "voyages";
pub const CHECKPOINTS: &str = "checkpoints";
pub const GPS_TRACKS: &str = "gps_tracks";

/// Current time in Unix milliseconds
pub fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// Lifecycle state of a voyage
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum VoyageStatus {
    InProgress,
    Completed,
    Cancelled,
}

impl std::fmt::Display for VoyageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VoyageStatus::InProgress => write!(f, "in_progress"),
            VoyageStatus::Completed => write!(f, "completed"),
            VoyageStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// A sailing voyage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Voyage {
    pub voyage_id: String,
    pub ship_id: String,
    pub ship_name: String,
    pub departure_port: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival_port: Option<String>,
    pub departure_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrival_time: Option<i64>,
    pub status: VoyageStatus,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Record for Voyage {
    const COLLECTION: &'static str = VOYAGES;
}

impl Voyage {
    /// Upper bound of the voyage's time window: arrival if set, otherwise `now`
    pub fn window_end(&self, now: i64) -> i64 {
        self.arrival_time.unwrap_or(now)
    }

    /// Check whether a timestamp falls inside `[departure_time, arrival_time or now]`
    pub fn window_contains(&self, timestamp: i64, now: i64) -> bool {
        timestamp >= self.departure_time && timestamp <= self.window_end(now)
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == VoyageStatus::InProgress
    }
}

/// Geographical coordinates in decimal degrees
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Location {
    pub latitude: f64,
    pub longitude: f64,
}

impl Location {
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self {
            latitude,
            longitude,
        }
    }

    /// Latitude within [-90, 90] and longitude within [-180, 180]
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Weather conditions observed at a checkpoint
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WeatherInfo {
    /// Celsius
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Knots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<f64>,
    /// Degrees
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wind_dir: Option<f64>,
    /// Meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wave_height: Option<f64>,
    /// e.g. "clear", "cloudy", "rainy"
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

/// A status event during a voyage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub voyage_id: String,
    pub location: Location,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weather: Option<WeatherInfo>,
    /// Free-form status payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub created_at: i64,
}

impl Record for Checkpoint {
    const COLLECTION: &'static str = CHECKPOINTS;
}

/// A GPS sample during a voyage
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GpsTrack {
    pub voyage_id: String,
    pub location: Location,
    /// Knots
    pub speed: f64,
    /// Degrees
    pub heading: f64,
    /// Meters
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub altitude: Option<f64>,
    pub timestamp: i64,
    pub created_at: i64,
}

impl Record for GpsTrack {
    const COLLECTION: &'static str = GPS_TRACKS;
}

/// A voyage with its checkpoints and GPS track, both ordered by timestamp
#[derive(Debug, Clone, Serialize)]
pub struct VoyageDetails {
    pub voyage: Stored<Voyage>,
    pub checkpoints: Vec<Stored<Checkpoint>>,
    pub gps_tracks: Vec<Stored<GpsTrack>>,
}

/// Time range for queries (closed interval: [start, end])
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Start timestamp (inclusive), in milliseconds
    pub start: i64,
    /// End timestamp (inclusive), in milliseconds
    pub end: i64,
}

impl TimeRange {
    /// Create a time range, returning None if `start > end`
    pub fn try_new(start: i64, end: i64) -> Option<Self> {
        if start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Everything up to and including `now`, going back `hours`
    pub fn last_hours(hours: i64) -> Self {
        let end = now_millis();
        Self {
            start: end - hours * 3_600_000,
            end,
        }
    }

    /// Unbounded range
    pub fn all() -> Self {
        Self {
            start: i64::MIN,
            end: i64::MAX,
        }
    }

    pub fn contains(&self, timestamp: i64) -> bool {
        timestamp >= self.start && timestamp <= self.end
    }
}
