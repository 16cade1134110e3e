// ABOUTME: Defines VehicleSnapshot, a single observation of one fleet vehicle at one instant.
// ABOUTME: Also defines the embedded Position and great-circle distance between positions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Mean earth radius in meters (IUGG).
const EARTH_RADIUS_METERS: f64 = 6_371_008.8;

/// Where a vehicle was parked when the snapshot was captured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub address: String,
    pub latitude: f64,
    pub longitude: f64,
}

impl Position {
    pub fn new(address: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            address: address.into(),
            latitude,
            longitude,
        }
    }

    /// Haversine distance to another position, in meters.
    pub fn distance_meters(&self, other: &Position) -> f64 {
        let lat1 = self.latitude.to_radians();
        let lat2 = other.latitude.to_radians();
        let dlat = (other.latitude - self.latitude).to_radians();
        let dlon = (other.longitude - self.longitude).to_radians();

        let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
        EARTH_RADIUS_METERS * c
    }
}

/// One observation of one vehicle. `identity` plus `captured_at` is the
/// natural key, although nothing enforces uniqueness.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleSnapshot {
    pub identity: String,
    pub captured_at: DateTime<Utc>,
    pub fuel_level: i64,
    pub cleanliness: String,
    pub license_plate: String,
    pub position: Position,
}

impl VehicleSnapshot {
    /// Return this snapshot with its capture time replaced. Decoded records
    /// carry the Unix epoch until they are stamped with their file's time.
    pub fn stamped(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_snapshot() -> VehicleSnapshot {
        VehicleSnapshot {
            identity: "Mini42".to_string(),
            captured_at: DateTime::<Utc>::default(),
            fuel_level: 80,
            cleanliness: "CLEAN".to_string(),
            license_plate: "M-DN 4242".to_string(),
            position: Position::new("Leopoldstr. 1, 80802 München", 48.1549, 11.5843),
        }
    }

    #[test]
    fn stamped_replaces_only_capture_time() {
        let at = DateTime::from_timestamp(1_400_000_000, 0).unwrap();
        let snap = make_snapshot().stamped(at);

        assert_eq!(snap.captured_at, at);
        assert_eq!(snap.identity, "Mini42");
        assert_eq!(snap.fuel_level, 80);
    }

    #[test]
    fn distance_to_same_position_is_zero() {
        let p = Position::new("here", 48.1549, 11.5843);
        assert_eq!(p.distance_meters(&p.clone()), 0.0);
    }

    #[test]
    fn distance_matches_known_city_pair() {
        // Munich Marienplatz to Berlin Alexanderplatz is roughly 504 km.
        let munich = Position::new("Marienplatz", 48.1374, 11.5755);
        let berlin = Position::new("Alexanderplatz", 52.5219, 13.4132);

        let d = munich.distance_meters(&berlin);
        assert!((d - 504_000.0).abs() < 5_000.0, "unexpected distance {}", d);
        assert!((d - berlin.distance_meters(&munich)).abs() < 1e-6);
    }

    #[test]
    fn snapshot_serde_round_trip() {
        let snap = make_snapshot().stamped(DateTime::from_timestamp(100, 0).unwrap());

        let json = serde_json::to_string(&snap).expect("serialize");
        let back: VehicleSnapshot = serde_json::from_str(&json).expect("deserialize");

        assert_eq!(snap, back);
    }
}
