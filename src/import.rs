//! CSV Track Import
//!
//! Bulk import of GPS track points from CSV files, as exported by chart
//! plotters and GPS loggers. Columns are detected from the header row:
//!
//! | Column      | Accepted headers                        |
//! |-------------|-----------------------------------------|
//! | voyage id   | `voyage_id`, `voyage`                   |
//! | timestamp   | `timestamp`, `time`, `date`, `datetime` |
//! | latitude    | `latitude`, `lat`                       |
//! | longitude   | `longitude`, `lon`, `lng`, `long`       |
//! | speed       | `speed`, `sog`                          |
//! | heading     | `heading`, `course`, `cog`              |
//! | altitude    | `altitude`, `alt`                       |
//!
//! Rows that cannot be parsed are counted and reported, not fatal. Parsed
//! points go through the ingestion path in batches.

use crate::ingest::{IngestError, Ingestor, NewTrackPoint};
use crate::storage::Location;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use std::io::Read;
use std::path::Path;
use thiserror::Error;

/// Errors that stop an import
#[derive(Error, Debug)]
pub enum ImportError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),
}

/// Column positions (0-indexed)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrackColumns {
    pub voyage_id: Option<usize>,
    pub timestamp: Option<usize>,
    pub latitude: Option<usize>,
    pub longitude: Option<usize>,
    pub speed: Option<usize>,
    pub heading: Option<usize>,
    pub altitude: Option<usize>,
}

impl TrackColumns {
    /// Detect column positions from a header row
    pub fn detect(headers: &csv::StringRecord) -> Self {
        let mut columns = Self::default();

        for (idx, header) in headers.iter().enumerate() {
            let slot = match header.trim().to_lowercase().replace(' ', "_").as_str() {
                "voyage_id" | "voyage" => &mut columns.voyage_id,
                "timestamp" | "time" | "date" | "datetime" => &mut columns.timestamp,
                "latitude" | "lat" => &mut columns.latitude,
                "longitude" | "lon" | "lng" | "long" => &mut columns.longitude,
                "speed" | "sog" => &mut columns.speed,
                "heading" | "course" | "cog" => &mut columns.heading,
                "altitude" | "alt" => &mut columns.altitude,
                _ => continue,
            };
            slot.get_or_insert(idx);
        }

        columns
    }
}

/// Result of parsing a CSV file
#[derive(Debug)]
pub struct TrackImportResult {
    pub points: Vec<NewTrackPoint>,
    pub rows_processed: usize,
    pub rows_failed: usize,
    pub errors: Vec<String>,
}

/// Outcome of writing parsed points
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    pub out_of_order: usize,
    pub batches: usize,
}

/// CSV track importer
pub struct TrackImporter {
    /// Voyage id for files without a voyage column (or to override it)
    voyage_id: Option<String>,
    /// Format string tried first for timestamps
    timestamp_format: Option<String>,
}

impl Default for TrackImporter {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackImporter {
    /// Create a new CSV importer with default settings
    pub fn new() -> Self {
        Self {
            voyage_id: None,
            timestamp_format: None,
        }
    }

    /// Assign every row to this voyage
    pub fn with_voyage_id(mut self, voyage_id: impl Into<String>) -> Self {
        self.voyage_id = Some(voyage_id.into());
        self
    }

    /// Set the timestamp format string
    pub fn with_timestamp_format(mut self, format: &str) -> Self {
        self.timestamp_format = Some(format.to_string());
        self
    }

    /// Parse a timestamp: Unix seconds or milliseconds, RFC 3339, or a
    /// common date/time format (UTC)
    fn parse_timestamp(&self, ts_str: &str) -> Result<i64, ImportError> {
        if let Ok(n) = ts_str.parse::<i64>() {
            // Values below 10^11 are seconds (10^11 ms is March 1973)
            return Ok(if n.unsigned_abs() < 100_000_000_000 { n * 1000 } else { n });
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(ts_str) {
            return Ok(dt.with_timezone(&Utc).timestamp_millis());
        }

        let formats = [
            "%Y-%m-%d %H:%M:%S",
            "%Y-%m-%dT%H:%M:%S",
            "%Y-%m-%dT%H:%M:%SZ",
            "%Y-%m-%d %H:%M",
            "%Y-%m-%d",
            "%Y/%m/%d %H:%M:%S",
            "%d/%m/%Y %H:%M:%S",
        ];

        for fmt in self.timestamp_format.as_deref().into_iter().chain(formats) {
            if let Ok(dt) = NaiveDateTime::parse_from_str(ts_str, fmt) {
                return Ok(dt.and_utc().timestamp_millis());
            }
            if let Some(dt) = NaiveDate::parse_from_str(ts_str, fmt)
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
            {
                return Ok(dt.and_utc().timestamp_millis());
            }
        }

        Err(ImportError::ParseError(format!(
            "Could not parse timestamp: {}",
            ts_str
        )))
    }

    /// Import data from a CSV file
    pub fn import(&self, path: &Path) -> Result<TrackImportResult, ImportError> {
        let file = std::fs::File::open(path)?;
        self.import_reader(file)
    }

    /// Import from a CSV string (useful for testing)
    pub fn import_str(&self, csv_data: &str) -> Result<TrackImportResult, ImportError> {
        self.import_reader(csv_data.as_bytes())
    }

    /// Import from any reader; the first row must be a header
    pub fn import_reader<R: Read>(&self, input: R) -> Result<TrackImportResult, ImportError> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .trim(csv::Trim::All)
            .from_reader(input);

        let columns = TrackColumns::detect(reader.headers()?);
        let (Some(lat_col), Some(lon_col)) = (columns.latitude, columns.longitude) else {
            return Err(ImportError::ParseError(
                "CSV header must contain latitude and longitude columns".to_string(),
            ));
        };
        if self.voyage_id.is_none() && columns.voyage_id.is_none() {
            return Err(ImportError::ParseError(
                "CSV has no voyage_id column and no voyage id was given".to_string(),
            ));
        }

        let mut points = Vec::new();
        let mut rows_processed = 0;
        let mut rows_failed = 0;
        let mut errors = Vec::new();

        for (line_num, result) in reader.records().enumerate() {
            // header is line 1
            let actual_line = line_num + 2;

            let row = result
                .map_err(ImportError::from)
                .and_then(|record| self.parse_row(&record, &columns, lat_col, lon_col));

            match row {
                Ok(point) => {
                    points.push(point);
                    rows_processed += 1;
                }
                Err(e) => {
                    errors.push(format!("Line {}: {}", actual_line, e));
                    rows_failed += 1;
                }
            }
        }

        // Truncate errors if too many
        if errors.len() > 100 {
            let total = errors.len();
            errors.truncate(100);
            errors.push(format!("... and {} more errors", total - 100));
        }

        Ok(TrackImportResult {
            points,
            rows_processed,
            rows_failed,
            errors,
        })
    }

    fn parse_row(
        &self,
        record: &csv::StringRecord,
        columns: &TrackColumns,
        lat_col: usize,
        lon_col: usize,
    ) -> Result<NewTrackPoint, ImportError> {
        let voyage_id = match (&self.voyage_id, columns.voyage_id) {
            (Some(id), _) => id.clone(),
            (None, Some(col)) => record
                .get(col)
                .filter(|s| !s.is_empty())
                .ok_or_else(|| ImportError::ParseError("missing voyage_id".to_string()))?
                .to_string(),
            (None, None) => {
                return Err(ImportError::ParseError("missing voyage_id".to_string()));
            }
        };

        let latitude = number(record, Some(lat_col), "latitude")?
            .ok_or_else(|| ImportError::ParseError("missing latitude".to_string()))?;
        let longitude = number(record, Some(lon_col), "longitude")?
            .ok_or_else(|| ImportError::ParseError("missing longitude".to_string()))?;

        let timestamp = match columns.timestamp.and_then(|col| record.get(col)) {
            Some(s) if !s.is_empty() => Some(self.parse_timestamp(s)?),
            _ => None,
        };

        Ok(NewTrackPoint {
            voyage_id,
            location: Location::new(latitude, longitude),
            speed: number(record, columns.speed, "speed")?.unwrap_or(0.0),
            heading: number(record, columns.heading, "heading")?.unwrap_or(0.0),
            altitude: number(record, columns.altitude, "altitude")?,
            timestamp,
        })
    }

    /// Write parsed points through the ingestion path, in batches of the
    /// ingestor's maximum size. Stops at the first rejected batch.
    pub async fn load(
        &self,
        ingestor: &Ingestor,
        points: Vec<NewTrackPoint>,
    ) -> Result<ImportSummary, ImportError> {
        let batch_size = ingestor.config().max_batch_size.max(1);
        let mut summary = ImportSummary::default();

        let mut remaining = points.into_iter().peekable();
        while remaining.peek().is_some() {
            let batch: Vec<NewTrackPoint> = remaining.by_ref().take(batch_size).collect();
            let receipts = ingestor.record_track_points(batch).await?;

            summary.imported += receipts.len();
            summary.out_of_order += receipts.iter().filter(|r| r.out_of_order).count();
            summary.batches += 1;
        }

        tracing::info!(
            "Imported {} track points in {} batches ({} out of order)",
            summary.imported,
            summary.batches,
            summary.out_of_order
        );
        Ok(summary)
    }
}

/// Parse an optional numeric cell; empty cells are `None`
fn number(
    record: &csv::StringRecord,
    column: Option<usize>,
    name: &str,
) -> Result<Option<f64>, ImportError> {
    match column.and_then(|col| record.get(col)) {
        Some(s) if !s.is_empty() => s
            .parse::<f64>()
            .map(Some)
            .map_err(|_| ImportError::ParseError(format!("invalid {}: {}", name, s))),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{IngestConfig, NewVoyage};
    use crate::schema::Schema;
    use crate::storage::{now_millis, DocumentStore, StorageConfig, GPS_TRACKS};
    use std::sync::Arc;

    #[test]
    fn test_detect_columns() {
        let headers = csv::StringRecord::from(vec!["Time", "Lat", "Lon", "SOG", "COG", "voyage"]);
        let columns = TrackColumns::detect(&headers);
        assert_eq!(columns.timestamp, Some(0));
        assert_eq!(columns.latitude, Some(1));
        assert_eq!(columns.longitude, Some(2));
        assert_eq!(columns.speed, Some(3));
        assert_eq!(columns.heading, Some(4));
        assert_eq!(columns.voyage_id, Some(5));
        assert_eq!(columns.altitude, None);
    }

    #[test]
    fn test_simple_csv_import() {
        let csv_data = "voyage_id,timestamp,latitude,longitude,speed,heading
V1,2024-01-15T10:00:00Z,54.32,10.12,6.5,45
V1,1705312860,54.33,10.13,6.8,47
V1,1705312920000,54.34,10.14,,";

        let result = TrackImporter::new().import_str(csv_data).unwrap();

        assert_eq!(result.rows_processed, 3);
        assert_eq!(result.rows_failed, 0);
        let times: Vec<Option<i64>> = result.points.iter().map(|p| p.timestamp).collect();
        assert_eq!(
            times,
            vec![
                Some(1_705_312_800_000),
                Some(1_705_312_860_000),
                Some(1_705_312_920_000)
            ]
        );
        assert_eq!(result.points[2].speed, 0.0);
    }

    #[test]
    fn test_csv_with_bad_rows() {
        let csv_data = "lat,lon,time
54.32,10.12,2024-01-15 10:00:00
north,10.13,2024-01-15 10:01:00
54.34,10.14,yesterday";

        let result = TrackImporter::new()
            .with_voyage_id("V9")
            .import_str(csv_data)
            .unwrap();

        assert_eq!(result.rows_processed, 1);
        assert_eq!(result.rows_failed, 2);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].starts_with("Line 3"));
        assert_eq!(result.points[0].voyage_id, "V9");
    }

    #[test]
    fn test_missing_required_columns() {
        assert!(TrackImporter::new()
            .import_str("voyage_id,lat\nV1,1.0")
            .is_err());
        assert!(TrackImporter::new().import_str("lat,lon\n1.0,2.0").is_err());
    }

    #[tokio::test]
    async fn test_load_in_batches() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(DocumentStore::open(StorageConfig::new(dir.path())).await.unwrap());
        store.ensure_schema(&Schema::sailing()).await.unwrap();
        let config = IngestConfig {
            max_batch_size: 2,
            ..Default::default()
        };
        let ingestor = Ingestor::new(Arc::clone(&store), config);

        let t0 = now_millis() - 3_600_000;
        ingestor
            .depart_voyage(NewVoyage::new("S1", "Albatross", "Kiel").with_id("V1").departing_at(t0))
            .await
            .unwrap();

        let csv_data = format!(
            "timestamp,lat,lon\n{},54.0,10.0\n{},54.1,10.1\n{},54.2,10.2\n",
            t0 + 1000,
            t0 + 3000,
            t0 + 2000
        );
        let importer = TrackImporter::new().with_voyage_id("V1");
        let parsed = importer.import_str(&csv_data).unwrap();
        let summary = importer.load(&ingestor, parsed.points).await.unwrap();

        assert_eq!(
            summary,
            ImportSummary {
                imported: 3,
                out_of_order: 1,
                batches: 2,
            }
        );
        assert_eq!(store.scan(GPS_TRACKS, |_| true).await.unwrap().len(), 3);
    }
}
