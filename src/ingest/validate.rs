//! Payload and timestamp checks for incoming telemetry
//!
//! Everything here is pure: no store access, no locks. Callers run these
//! before touching the store so a rejected write leaves nothing behind.

use crate::ingest::{IngestError, NewCheckpoint, NewTrackPoint, NewVoyage};
use crate::storage::{Location, Voyage};

fn require(field: &str, value: &str) -> Result<(), IngestError> {
    if value.trim().is_empty() {
        return Err(IngestError::InvalidPayload(format!("{} is required", field)));
    }
    Ok(())
}

pub fn voyage_id(voyage_id: &str) -> Result<(), IngestError> {
    require("voyage_id", voyage_id)
}

pub fn new_voyage(voyage: &NewVoyage) -> Result<(), IngestError> {
    require("ship_id", &voyage.ship_id)?;
    require("ship_name", &voyage.ship_name)?;
    require("departure_port", &voyage.departure_port)?;
    Ok(())
}

pub fn location(location: &Location) -> Result<(), IngestError> {
    if !location.is_valid() {
        return Err(IngestError::InvalidPayload(format!(
            "invalid coordinates: latitude {} longitude {}",
            location.latitude, location.longitude
        )));
    }
    Ok(())
}

pub fn checkpoint(checkpoint: &NewCheckpoint) -> Result<(), IngestError> {
    voyage_id(&checkpoint.voyage_id)?;
    location(&checkpoint.location)
}

pub fn track_point(point: &NewTrackPoint) -> Result<(), IngestError> {
    voyage_id(&point.voyage_id)?;
    location(&point.location)?;

    if !point.speed.is_finite() || point.speed < 0.0 {
        return Err(IngestError::InvalidPayload(format!(
            "speed must be a non-negative number, got {}",
            point.speed
        )));
    }
    if !point.heading.is_finite() || !(0.0..360.0).contains(&point.heading) {
        return Err(IngestError::InvalidPayload(format!(
            "heading must be within [0, 360), got {}",
            point.heading
        )));
    }
    if let Some(altitude) = point.altitude {
        if !altitude.is_finite() {
            return Err(IngestError::InvalidPayload(format!(
                "altitude must be finite, got {}",
                altitude
            )));
        }
    }
    Ok(())
}

/// Timestamp must fall within `[departure_time, arrival_time or now]`
pub fn within_window(voyage: &Voyage, timestamp: i64, now: i64) -> Result<(), IngestError> {
    if !voyage.window_contains(timestamp, now) {
        return Err(IngestError::InvalidTimestamp(format!(
            "{} is outside voyage {} window [{}, {}]",
            timestamp,
            voyage.voyage_id,
            voyage.departure_time,
            voyage.window_end(now)
        )));
    }
    Ok(())
}

/// Arrival must not precede departure or anything already recorded
pub fn arrival(voyage: &Voyage, arrival_time: i64, latest_recorded: Option<i64>) -> Result<(), IngestError> {
    if arrival_time < voyage.departure_time {
        return Err(IngestError::InvalidTimestamp(format!(
            "arrival {} precedes departure {} of voyage {}",
            arrival_time, voyage.departure_time, voyage.voyage_id
        )));
    }
    if let Some(latest) = latest_recorded {
        if arrival_time < latest {
            return Err(IngestError::InvalidTimestamp(format!(
                "arrival {} precedes telemetry recorded at {} for voyage {}",
                arrival_time, latest, voyage.voyage_id
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::VoyageStatus;

    fn voyage(departure: i64, arrival: Option<i64>) -> Voyage {
        Voyage {
            voyage_id: "V1".to_string(),
            ship_id: "S1".to_string(),
            ship_name: "Albatross".to_string(),
            departure_port: "Kiel".to_string(),
            arrival_port: None,
            departure_time: departure,
            arrival_time: arrival,
            status: VoyageStatus::InProgress,
            created_at: departure,
            updated_at: departure,
        }
    }

    fn point(speed: f64, heading: f64) -> NewTrackPoint {
        NewTrackPoint {
            voyage_id: "V1".to_string(),
            location: Location::new(10.0, 20.0),
            speed,
            heading,
            altitude: None,
            timestamp: None,
        }
    }

    #[test]
    fn test_required_voyage_fields() {
        let mut v = NewVoyage {
            voyage_id: None,
            ship_id: "S1".to_string(),
            ship_name: "Albatross".to_string(),
            departure_port: "Kiel".to_string(),
            departure_time: None,
        };
        assert!(new_voyage(&v).is_ok());

        v.ship_name = "  ".to_string();
        assert!(matches!(new_voyage(&v), Err(IngestError::InvalidPayload(_))));
    }

    #[test]
    fn test_track_point_ranges() {
        assert!(track_point(&point(5.0, 0.0)).is_ok());
        assert!(track_point(&point(5.0, 359.9)).is_ok());
        assert!(track_point(&point(-1.0, 0.0)).is_err());
        assert!(track_point(&point(5.0, 360.0)).is_err());
        assert!(track_point(&point(f64::NAN, 0.0)).is_err());

        let mut p = point(5.0, 90.0);
        p.location = Location::new(91.0, 0.0);
        assert!(track_point(&p).is_err());
    }

    #[test]
    fn test_window() {
        let open = voyage(1_000, None);
        assert!(within_window(&open, 1_000, 2_000).is_ok());
        assert!(within_window(&open, 2_000, 2_000).is_ok());
        assert!(matches!(
            within_window(&open, 999, 2_000),
            Err(IngestError::InvalidTimestamp(_))
        ));
        assert!(within_window(&open, 2_001, 2_000).is_err());

        let closed = voyage(1_000, Some(1_500));
        assert!(within_window(&closed, 1_600, 9_000).is_err());
    }

    #[test]
    fn test_arrival() {
        let v = voyage(1_000, None);
        assert!(arrival(&v, 1_000, None).is_ok());
        assert!(arrival(&v, 999, None).is_err());
        assert!(arrival(&v, 1_200, Some(1_300)).is_err());
        assert!(arrival(&v, 1_300, Some(1_300)).is_ok());
    }
}
